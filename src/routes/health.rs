//! Liveness endpoint
//!
//! `/health` answers 200 whenever the gateway is running. Ledger
//! reachability is reported but never fails the probe: a degraded ledger
//! means simulated mode, not an outage.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::routes::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' with a reachable ledger, 'degraded' when simulating
    pub status: &'static str,
    pub version: &'static str,
    pub uptime: u64,
    pub timestamp: String,
    pub store: &'static str,
    pub ledger: LedgerHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerHealth {
    pub connected: bool,
    pub mock_mode: bool,
    pub last_checked: Option<String>,
}

pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let ledger = state.connection.state().await;
    let status = if ledger.connected && !ledger.mock_mode {
        "online"
    } else {
        "degraded"
    };

    let response = HealthResponse {
        healthy: true,
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        store: state.store_backend,
        ledger: LedgerHealth {
            connected: ledger.connected,
            mock_mode: ledger.mock_mode,
            last_checked: ledger.last_checked.map(|t| t.to_rfc3339()),
        },
    };

    json_response(StatusCode::OK, &response)
}
