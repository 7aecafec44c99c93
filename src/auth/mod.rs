//! Authentication and authorization
//!
//! Provides:
//! - Bearer JWT validation producing a typed `Session`
//! - Roles and the minimum role per gateway operation

pub mod permissions;
pub mod session;

pub use permissions::{is_operation_allowed, required_role, Role};
pub use session::{extract_token_from_header, Claims, Session, SessionValidator};
