//! Ledger routes
//!
//! - GET  /api/blockchain/status         connection status (admin)
//! - POST /api/blockchain/reload         re-read ledger config (admin)
//! - GET  /api/blockchain/audit          audit entries (admin)
//! - POST /api/blockchain/confirmations  resolve pending transactions now (admin)
//! - POST /api/blockchain/submit         anchor a grade payload (teacher)
//! - POST /api/blockchain/verify         check a ledger record (any session)

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::Session;
use crate::db::schemas::{AuditDoc, AuditKind, AuditOutcome};
use crate::routes::{json_response, parse_query, read_json, read_json_or_default};
use crate::server::AppState;
use crate::services::{Actor, ExpectedGrade, GradeSubmission};
use crate::types::Result;

const DEFAULT_AUDIT_LIMIT: usize = 50;
const MAX_AUDIT_LIMIT: usize = 500;

pub async fn handle_status(state: &AppState, session: &Session) -> Result<Response<Full<Bytes>>> {
    session.authorize("status")?;
    let status = state.connection.status().await?;
    Ok(json_response(StatusCode::OK, &status))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadRequest {
    #[serde(default)]
    pub force_mock_mode: Option<bool>,
}

pub async fn handle_reload(
    state: &AppState,
    session: &Session,
    actor: &Actor,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("reload")?;
    let body: ReloadRequest = read_json_or_default(req).await?;
    state
        .connection
        .reload_config(body.force_mock_mode, actor)
        .await?;
    let status = state.connection.status().await?;
    Ok(json_response(StatusCode::OK, &status))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    #[serde(default)]
    pub kind: Option<AuditKind>,
    #[serde(default)]
    pub limit: Option<usize>,
    /// Only compatibility downgrades inside the trailing window
    #[serde(default)]
    pub recent_compat: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntryView {
    pub id: String,
    pub user_id: Option<String>,
    pub action: String,
    pub details: String,
    pub ip_address: Option<String>,
    pub created_at: String,
    pub kind: AuditKind,
    pub outcome: AuditOutcome,
}

impl From<AuditDoc> for AuditEntryView {
    fn from(doc: AuditDoc) -> Self {
        Self {
            id: doc.id,
            user_id: doc.user_id,
            action: doc.action,
            details: doc.details,
            ip_address: doc.ip_address,
            created_at: doc.created_at.to_chrono().to_rfc3339(),
            kind: doc.kind,
            outcome: doc.outcome,
        }
    }
}

pub async fn handle_audit(
    state: &AppState,
    session: &Session,
    req: &Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("audit")?;
    let query: AuditQuery = parse_query(req)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);

    let entries = if query.recent_compat.unwrap_or(false) {
        state.audit.recent_compat_errors(limit).await?
    } else {
        state.audit.recent(query.kind, limit).await?
    };
    let entries: Vec<AuditEntryView> = entries.into_iter().map(AuditEntryView::from).collect();

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "entries": entries, "count": entries.len() }),
    ))
}

pub async fn handle_confirmations(
    state: &AppState,
    session: &Session,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("confirmations")?;
    let report = state.confirmations.sweep().await?;
    Ok(json_response(StatusCode::OK, &report))
}

pub async fn handle_submit(
    state: &AppState,
    session: &Session,
    actor: &Actor,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("submit")?;
    let submission: GradeSubmission = read_json(req).await?;
    let result = state.submitter.submit_grade(&submission, actor).await?;
    Ok(json_response(StatusCode::OK, &result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub blockchain_grade_id: String,
    #[serde(flatten)]
    pub expected: ExpectedGrade,
}

pub async fn handle_verify(
    state: &AppState,
    session: &Session,
    actor: &Actor,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    session.authorize("verify")?;
    let body: VerifyRequest = read_json(req).await?;
    let result = state
        .verifier
        .verify_grade(&body.blockchain_grade_id, &body.expected, actor)
        .await?;
    Ok(json_response(StatusCode::OK, &result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_request_flattens_expected() {
        let body: VerifyRequest = serde_json::from_str(
            r#"{"blockchainGradeId":"ab","studentId":"s1","courseId":"c1","score":85,"semester":"2024-1","teacherId":"t1"}"#,
        )
        .unwrap();
        assert_eq!(body.blockchain_grade_id, "ab");
        assert_eq!(body.expected.score, 85);
    }

    #[test]
    fn test_audit_query_parses_kind() {
        let query: AuditQuery =
            serde_urlencoded::from_str("kind=COMPAT_DOWNGRADE&limit=5&recentCompat=true").unwrap();
        assert_eq!(query.kind, Some(AuditKind::CompatDowngrade));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.recent_compat, Some(true));
    }
}
