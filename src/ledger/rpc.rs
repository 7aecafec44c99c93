//! JSON-RPC ledger client
//!
//! Talks to an Ethereum-compatible node hosting the grade contract.
//!
//! ## Submission
//!
//! 1. Encode `addGrade` calldata
//! 2. `eth_estimateGas`, plus the configured safety margin
//! 3. `eth_gasPrice` and `eth_getBalance` to refuse unaffordable writes
//! 4. Sign locally and `eth_sendRawTransaction`, or `eth_sendTransaction`
//!    when the node manages the account
//!
//! Steps 2-4 hold the per-account submission lock so concurrent writers
//! never race on the account nonce.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::abi;
use super::signer::{parse_address, LegacyTransaction, LocalSigner};
use super::{Broadcast, GradeEntry, Inclusion, LedgerClient, LedgerError, LedgerMode, StoredGrade};
use crate::config::LedgerSettings;

/// Default receipt polling interval while waiting for inclusion
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[allow(dead_code)]
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptResponse {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<LogResponse>,
}

#[derive(Debug, Deserialize)]
struct LogResponse {
    address: String,
    #[serde(default)]
    topics: Vec<String>,
}

pub struct RpcLedgerClient {
    http: reqwest::Client,
    endpoint: String,
    account: String,
    contract: String,
    signer: Option<LocalSigner>,
    configured_chain_id: Option<u64>,
    chain_id: OnceCell<u64>,
    gas_margin_percent: u64,
    receipt_poll_interval: Duration,
    grade_added_topic: String,
    submit_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for RpcLedgerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLedgerClient")
            .field("endpoint", &self.endpoint)
            .field("account", &self.account)
            .field("contract", &self.contract)
            .field("local_signing", &self.signer.is_some())
            .finish()
    }
}

impl RpcLedgerClient {
    /// Build a client from resolved settings.
    ///
    /// With a private key configured, the signing account is the key's
    /// address; a mismatching `LEDGER_ACCOUNT` is reported and ignored.
    pub fn from_settings(settings: &LedgerSettings) -> Result<Self, LedgerError> {
        let endpoint = settings
            .rpc_url
            .clone()
            .ok_or_else(|| LedgerError::NotConfigured("LEDGER_RPC_URL is not set".into()))?;
        let contract = settings
            .contract_address
            .clone()
            .ok_or_else(|| LedgerError::NotConfigured("LEDGER_CONTRACT_ADDRESS is not set".into()))?;
        parse_address(&contract)?;

        let signer = settings
            .private_key
            .as_ref()
            .map(LocalSigner::from_secret)
            .transpose()?;

        let account = match (&signer, &settings.account) {
            (Some(signer), Some(configured)) => {
                if !signer.address().eq_ignore_ascii_case(configured) {
                    warn!(
                        configured = %configured,
                        derived = %signer.address(),
                        "LEDGER_ACCOUNT does not match the private key; using the key's address"
                    );
                }
                signer.address().to_string()
            }
            (Some(signer), None) => signer.address().to_string(),
            (None, Some(configured)) => {
                parse_address(configured)?;
                configured.to_ascii_lowercase()
            }
            (None, None) => {
                return Err(LedgerError::NotConfigured(
                    "LEDGER_ACCOUNT or LEDGER_PRIVATE_KEY is required".into(),
                ))
            }
        };

        let http = reqwest::Client::builder()
            .timeout(settings.rpc_timeout)
            .build()
            .map_err(|e| LedgerError::NotConfigured(format!("failed to build HTTP client: {}", e)))?;

        info!(
            endpoint = %endpoint,
            account = %account,
            contract = %contract,
            local_signing = signer.is_some(),
            "Ledger RPC client configured"
        );

        Ok(Self {
            http,
            endpoint,
            account,
            contract: contract.to_ascii_lowercase(),
            signer,
            configured_chain_id: settings.chain_id,
            chain_id: OnceCell::new(),
            gas_margin_percent: settings.gas_margin_percent,
            receipt_poll_interval: RECEIPT_POLL_INTERVAL,
            grade_added_topic: abi::event_topic(abi::GRADE_ADDED_EVENT),
            submit_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Override the receipt polling interval
    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport(method, e))?;

        if !response.status().is_success() {
            return Err(LedgerError::ConnectionUnavailable(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::Decode(format!("{}: {}", method, e)))?;

        if let Some(error) = body.error {
            debug!(method, message = %error.message, "Ledger RPC returned an error");
            return Err(classify_node_error(error));
        }

        serde_json::from_value(body.result)
            .map_err(|e| LedgerError::Decode(format!("{}: {}", method, e)))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<u128, LedgerError> {
        let raw: String = self.call(method, params).await?;
        parse_quantity(&raw)
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        if let Some(id) = self.configured_chain_id {
            return Ok(id);
        }
        self.chain_id
            .get_or_try_init(|| async {
                let id = self.quantity("eth_chainId", json!([])).await?;
                u64::try_from(id).map_err(|_| LedgerError::Decode("chain id out of range".into()))
            })
            .await
            .copied()
    }

    fn receipt_to_inclusion(&self, receipt: ReceiptResponse) -> Result<Option<Inclusion>, LedgerError> {
        let Some(block) = receipt.block_number else {
            return Ok(None);
        };
        let block_number = u64::try_from(parse_quantity(&block)?)
            .map_err(|_| LedgerError::Decode("block number out of range".into()))?;

        let grade_id = receipt
            .logs
            .iter()
            .filter(|log| log.address.eq_ignore_ascii_case(&self.contract))
            .filter(|log| {
                log.topics
                    .first()
                    .is_some_and(|t| t.eq_ignore_ascii_case(&self.grade_added_topic))
            })
            .find_map(|log| log.topics.get(1).and_then(|t| super::normalize_grade_id(t)));

        Ok(Some(Inclusion {
            tx_hash: receipt.transaction_hash.to_ascii_lowercase(),
            block_number,
            grade_id,
            succeeded: receipt.status.as_deref() != Some("0x0"),
        }))
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    fn mode(&self) -> LedgerMode {
        LedgerMode::Real
    }

    async fn probe(&self) -> Result<u64, LedgerError> {
        let block = self.quantity("eth_blockNumber", json!([])).await?;

        let code: String = self
            .call("eth_getCode", json!([self.contract, "latest"]))
            .await?;
        if code.trim_start_matches("0x").is_empty() {
            return Err(LedgerError::NotConfigured(format!(
                "no contract code at {}",
                self.contract
            )));
        }

        u64::try_from(block).map_err(|_| LedgerError::Decode("block number out of range".into()))
    }

    async fn broadcast_grade(&self, entry: &GradeEntry) -> Result<Broadcast, LedgerError> {
        let data = abi::encode_add_grade(entry);
        let data_hex = format!("0x{}", hex::encode(&data));

        let _guard = self.submit_lock.lock().await;

        let estimate = self
            .quantity(
                "eth_estimateGas",
                json!([{ "from": self.account, "to": self.contract, "data": data_hex }]),
            )
            .await?;
        let gas_limit = estimate.saturating_mul(100 + self.gas_margin_percent as u128) / 100;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let cost = gas_limit.saturating_mul(gas_price);

        let balance = self
            .quantity("eth_getBalance", json!([self.account, "latest"]))
            .await?;
        if balance < cost {
            return Err(LedgerError::InsufficientResources(format!(
                "account {} holds {} wei, transaction needs up to {} wei",
                self.account, balance, cost
            )));
        }

        debug!(estimate, gas_limit, gas_price, "Submitting grade transaction");

        let tx_hash: String = match &self.signer {
            Some(signer) => {
                let nonce = self
                    .quantity("eth_getTransactionCount", json!([self.account, "pending"]))
                    .await?;
                let tx = LegacyTransaction {
                    nonce: u64::try_from(nonce)
                        .map_err(|_| LedgerError::Decode("nonce out of range".into()))?,
                    gas_price,
                    gas_limit: u64::try_from(gas_limit)
                        .map_err(|_| LedgerError::Decode("gas limit out of range".into()))?,
                    to: parse_address(&self.contract)?,
                    value: 0,
                    data,
                };
                let raw = signer.sign_legacy(&tx, self.chain_id().await?)?;
                self.call(
                    "eth_sendRawTransaction",
                    json!([format!("0x{}", hex::encode(raw))]),
                )
                .await?
            }
            None => {
                self.call(
                    "eth_sendTransaction",
                    json!([{
                        "from": self.account,
                        "to": self.contract,
                        "data": data_hex,
                        "gas": format_quantity(gas_limit),
                        "gasPrice": format_quantity(gas_price),
                    }]),
                )
                .await?
            }
        };

        Ok(Broadcast {
            tx_hash: tx_hash.to_ascii_lowercase(),
        })
    }

    async fn await_inclusion(&self, tx_hash: &str) -> Result<Inclusion, LedgerError> {
        loop {
            if let Some(inclusion) = self.transaction_receipt(tx_hash).await? {
                return Ok(inclusion);
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<Inclusion>, LedgerError> {
        let receipt: Option<ReceiptResponse> = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        match receipt {
            Some(receipt) => self.receipt_to_inclusion(receipt),
            None => Ok(None),
        }
    }

    async fn get_grade(&self, grade_id: &str) -> Result<Option<StoredGrade>, LedgerError> {
        let data = abi::encode_get_grade(grade_id)?;
        let result: Result<String, LedgerError> = self
            .call(
                "eth_call",
                json!([{ "to": self.contract, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await;

        let raw = match result {
            Ok(raw) => raw,
            // The contract reverts on unknown identifiers
            Err(LedgerError::Reverted(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let bytes = hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| LedgerError::Decode(format!("eth_call result: {}", e)))?;
        if bytes.is_empty() {
            return Ok(None);
        }

        let stored = abi::decode_stored_grade(&bytes)?;
        if stored.timestamp == 0 && stored.student_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(stored))
    }
}

fn classify_transport(method: &str, err: reqwest::Error) -> LedgerError {
    if err.is_timeout() {
        LedgerError::Timeout(format!("{}: {}", method, err))
    } else if err.is_decode() {
        LedgerError::Decode(format!("{}: {}", method, err))
    } else {
        LedgerError::ConnectionUnavailable(format!("{}: {}", method, err))
    }
}

fn classify_node_error(error: JsonRpcError) -> LedgerError {
    let lower = error.message.to_ascii_lowercase();
    let detail = match &error.data {
        Some(data) => format!("{} ({})", error.message, data),
        None => error.message.clone(),
    };

    if lower.contains("insufficient funds") {
        LedgerError::InsufficientResources(detail)
    } else if lower.contains("execution reverted") {
        LedgerError::Reverted(detail)
    } else {
        LedgerError::Rpc(detail)
    }
}

/// Parse a JSON-RPC hex quantity
pub fn parse_quantity(raw: &str) -> Result<u128, LedgerError> {
    let digits = raw.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| LedgerError::Decode(format!("invalid quantity {:?}: {}", raw, e)))
}

/// Format a JSON-RPC hex quantity
pub fn format_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x5208").unwrap(), 21_000);
        assert!(parse_quantity("0xzz").is_err());
        assert_eq!(format_quantity(21_000), "0x5208");
    }

    #[test]
    fn test_node_error_classification() {
        let err = classify_node_error(JsonRpcError {
            code: -32000,
            message: "insufficient funds for gas * price + value".into(),
            data: None,
        });
        assert!(matches!(err, LedgerError::InsufficientResources(_)));

        let err = classify_node_error(JsonRpcError {
            code: 3,
            message: "execution reverted: grade not found".into(),
            data: Some(json!("0x08c379a0")),
        });
        assert!(matches!(err, LedgerError::Reverted(_)));
        assert!(err.raw_message().contains("0x08c379a0"));

        // Opcode failures stay unclassified here; the mode selector owns that decision
        let err = classify_node_error(JsonRpcError {
            code: -32000,
            message: "invalid opcode: MCOPY".into(),
            data: None,
        });
        assert!(matches!(err, LedgerError::Rpc(_)));
    }

    #[test]
    fn test_missing_configuration() {
        let settings = LedgerSettings::default();
        assert!(matches!(
            RpcLedgerClient::from_settings(&settings),
            Err(LedgerError::NotConfigured(_))
        ));

        let settings = LedgerSettings {
            rpc_url: Some("http://127.0.0.1:8545".into()),
            contract_address: Some(format!("0x{}", "11".repeat(20))),
            ..Default::default()
        };
        assert!(matches!(
            RpcLedgerClient::from_settings(&settings),
            Err(LedgerError::NotConfigured(_))
        ));
    }
}
