//! grade-attest - grade attestation gateway

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grade_attest::{
    config::{Args, EnvConfigSource, LedgerSettings},
    db::{AttestationStore, MemoryStore, MongoClient, MongoStore},
    server::{self, AppState},
    services::rpc_client_factory,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("grade_attest={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let ledger = LedgerSettings::from_args(&args.ledger);
    info!("======================================");
    info!("  grade-attest");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Ledger RPC: {}", ledger.rpc_url.as_deref().unwrap_or("(not configured)"));
    info!("Forced mock mode: {}", ledger.force_mock_mode);
    info!("Compatibility signatures: {:?}", ledger.compat_signatures);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("======================================");

    // MongoDB is optional in dev mode
    let (store, backend): (Arc<dyn AttestationStore>, &'static str) =
        match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
            Ok(client) => {
                info!("MongoDB connected successfully");
                (Arc::new(MongoStore::new(&client).await?), "mongodb")
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("MongoDB connection failed (dev mode, using in-memory store): {}", e);
                    (Arc::new(MemoryStore::new()), "memory")
                } else {
                    error!("MongoDB connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    let state = AppState::new(
        args,
        store,
        backend,
        Arc::new(EnvConfigSource),
        rpc_client_factory(),
    )?;

    server::run(Arc::new(state)).await?;

    Ok(())
}
