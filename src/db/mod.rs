//! Persistence for grades, ledger transaction records and the audit log

pub mod memory;
pub mod mongo;
pub mod mongo_store;
pub mod schemas;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::{MongoClient, MongoCollection};
pub use mongo_store::MongoStore;
pub use store::AttestationStore;
