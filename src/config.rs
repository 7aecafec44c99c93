//! Configuration for the attestation gateway
//!
//! CLI arguments and environment variable handling using clap. Ledger
//! settings live in their own flattened group so they can be re-read from
//! the environment on an operator reload without restarting the process.

use clap::Parser;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::AttestError;

/// Grade attestation gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "grade-attest")]
#[command(about = "Anchors grade records to an external ledger with simulated fallback")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8090")]
    pub listen: SocketAddr,

    /// Enable development mode (dev JWT secret, in-memory store fallback)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "grades")]
    pub mongodb_db: String,

    /// JWT secret for session tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Interval between confirmation sweeps for pending ledger transactions
    #[arg(long, env = "CONFIRMATION_POLL_SECS", default_value = "30")]
    pub confirmation_poll_secs: u64,

    /// Pending transactions polled per confirmation sweep
    #[arg(long, env = "CONFIRMATION_BATCH_SIZE", default_value = "100")]
    pub confirmation_batch_size: usize,

    /// Ledger configuration
    #[command(flatten)]
    pub ledger: LedgerArgs,
}

/// Ledger connection configuration
#[derive(Parser, Debug, Clone)]
pub struct LedgerArgs {
    /// Run every ledger interaction in simulated mode
    #[arg(long, env = "FORCE_MOCK_MODE", default_value = "false")]
    pub force_mock_mode: bool,

    /// Ledger node JSON-RPC endpoint
    #[arg(long, env = "LEDGER_RPC_URL")]
    pub ledger_rpc_url: Option<String>,

    /// Signing account address (0x-prefixed)
    #[arg(long, env = "LEDGER_ACCOUNT")]
    pub ledger_account: Option<String>,

    /// Signing private key (hex). When absent the node signs for the account.
    #[arg(long, env = "LEDGER_PRIVATE_KEY", hide_env_values = true)]
    pub ledger_private_key: Option<String>,

    /// Deployed grade contract address
    #[arg(long, env = "LEDGER_CONTRACT_ADDRESS")]
    pub ledger_contract_address: Option<String>,

    /// Chain id for transaction signing (queried from the node if unset)
    #[arg(long, env = "LEDGER_CHAIN_ID")]
    pub ledger_chain_id: Option<u64>,

    /// Timeout for a single RPC round trip in milliseconds
    #[arg(long, env = "LEDGER_RPC_TIMEOUT_MS", default_value = "15000")]
    pub ledger_rpc_timeout_ms: u64,

    /// Upper bound for submission and for verification in milliseconds
    #[arg(long, env = "LEDGER_SUBMIT_TIMEOUT_MS", default_value = "30000")]
    pub ledger_submit_timeout_ms: u64,

    /// Safety margin added to the node's gas estimate, in percent
    #[arg(long, env = "LEDGER_GAS_MARGIN_PERCENT", default_value = "20")]
    pub ledger_gas_margin_percent: u64,

    /// Node error fragments that mean the node cannot run the contract
    #[arg(
        long,
        env = "LEDGER_COMPAT_SIGNATURES",
        value_delimiter = ',',
        default_value = "invalid opcode"
    )]
    pub ledger_compat_signatures: Vec<String>,

    /// Keep running in mock mode after a compatibility failure
    #[arg(long, env = "LEDGER_PERSIST_COMPAT_DOWNGRADE", default_value = "false")]
    pub ledger_persist_compat_downgrade: bool,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match (&self.jwt_secret, self.dev_mode) {
            (Some(secret), _) => Some(secret.clone()),
            (None, true) => Some("dev-only-insecure-secret-for-local-testing".to_string()),
            (None, false) => None,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.confirmation_poll_secs == 0 {
            return Err("CONFIRMATION_POLL_SECS must be greater than zero".to_string());
        }

        if self.confirmation_batch_size == 0 {
            return Err("CONFIRMATION_BATCH_SIZE must be greater than zero".to_string());
        }

        LedgerSettings::from_args(&self.ledger)
            .validate()
            .map_err(|e| e.to_string())
    }
}

/// Signing key material, wiped on drop and never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigningSecret(String);

impl SigningSecret {
    pub fn new(hex_key: impl Into<String>) -> Self {
        Self(hex_key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret([redacted])")
    }
}

/// Resolved ledger settings, swapped as a whole on reload.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub force_mock_mode: bool,
    pub rpc_url: Option<String>,
    pub account: Option<String>,
    pub private_key: Option<SigningSecret>,
    pub contract_address: Option<String>,
    pub chain_id: Option<u64>,
    pub rpc_timeout: Duration,
    pub submit_timeout: Duration,
    pub gas_margin_percent: u64,
    pub compat_signatures: Vec<String>,
    pub persist_compat_downgrade: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            force_mock_mode: false,
            rpc_url: None,
            account: None,
            private_key: None,
            contract_address: None,
            chain_id: None,
            rpc_timeout: Duration::from_millis(15_000),
            submit_timeout: Duration::from_millis(30_000),
            gas_margin_percent: 20,
            compat_signatures: vec!["invalid opcode".to_string()],
            persist_compat_downgrade: false,
        }
    }
}

impl LedgerSettings {
    pub fn from_args(args: &LedgerArgs) -> Self {
        let non_empty = |v: &Option<String>| {
            v.as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Self {
            force_mock_mode: args.force_mock_mode,
            rpc_url: non_empty(&args.ledger_rpc_url),
            account: non_empty(&args.ledger_account),
            private_key: non_empty(&args.ledger_private_key).map(SigningSecret::new),
            contract_address: non_empty(&args.ledger_contract_address),
            chain_id: args.ledger_chain_id,
            rpc_timeout: Duration::from_millis(args.ledger_rpc_timeout_ms),
            submit_timeout: Duration::from_millis(args.ledger_submit_timeout_ms),
            gas_margin_percent: args.ledger_gas_margin_percent,
            compat_signatures: args
                .ledger_compat_signatures
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            persist_compat_downgrade: args.ledger_persist_compat_downgrade,
        }
    }

    /// Whether enough is configured to talk to a real node
    pub fn has_endpoint(&self) -> bool {
        self.rpc_url.is_some() && self.contract_address.is_some() && self.account.is_some()
    }

    pub fn validate(&self) -> Result<(), AttestError> {
        if self.rpc_timeout.is_zero() || self.submit_timeout.is_zero() {
            return Err(AttestError::Config(
                "ledger timeouts must be greater than zero".into(),
            ));
        }
        if self.compat_signatures.is_empty() {
            return Err(AttestError::Config(
                "LEDGER_COMPAT_SIGNATURES must name at least one signature".into(),
            ));
        }
        Ok(())
    }
}

/// Source of ledger settings, consulted at startup and on every reload.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<LedgerSettings, AttestError>;
}

/// Reads ledger settings from `.env` and the process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvConfigSource;

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> Result<LedgerSettings, AttestError> {
        // A missing .env file is fine; edits to an existing one win on reload.
        let _ = dotenvy::dotenv_override();

        let args = LedgerArgs::try_parse_from(["grade-attest"])
            .map_err(|e| AttestError::Config(format!("invalid ledger configuration: {}", e)))?;
        let settings = LedgerSettings::from_args(&args);
        settings.validate()?;
        Ok(settings)
    }
}

/// Fixed settings, for tests and embedding.
#[derive(Debug, Clone)]
pub struct StaticConfigSource(pub LedgerSettings);

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> Result<LedgerSettings, AttestError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_args_parse() {
        let args = LedgerArgs::try_parse_from([
            "grade-attest",
            "--force-mock-mode",
            "--ledger-rpc-url",
            "http://127.0.0.1:8545",
            "--ledger-compat-signatures",
            "invalid opcode: MCOPY,invalid opcode: PUSH0",
        ])
        .unwrap();

        let settings = LedgerSettings::from_args(&args);
        assert!(settings.force_mock_mode);
        assert_eq!(settings.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
        assert_eq!(settings.compat_signatures.len(), 2);
        assert_eq!(settings.gas_margin_percent, 20);
        assert!(!settings.has_endpoint());
    }

    #[test]
    fn test_signing_secret_is_redacted() {
        let settings = LedgerSettings {
            private_key: Some(SigningSecret::new("4c0883a69102937d6231471b5dbb6204fe512961708279")),
            ..Default::default()
        };
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("4c0883a6"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_validate_rejects_empty_signatures() {
        let settings = LedgerSettings {
            compat_signatures: vec![],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
