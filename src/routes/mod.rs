//! HTTP route handlers
//!
//! Handlers take the authenticated `Session` explicitly and return
//! `Result<Response, AttestError>`; the server turns errors into JSON bodies
//! that never carry raw ledger or storage detail.

pub mod blockchain;
pub mod grades;
pub mod health;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE};
use hyper::{HeaderMap, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::net::SocketAddr;

use crate::types::{AttestError, Result};

pub use blockchain::{
    handle_audit, handle_confirmations, handle_reload, handle_status, handle_submit,
    handle_verify,
};
pub use grades::{
    handle_attest, handle_create_grade, handle_edit_score, handle_get_grade, handle_verify_grade,
};
pub use health::health_check;

/// Largest request body accepted
const MAX_BODY_BYTES: usize = 64 * 1024;

/// JSON response with the given status
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(bytes) => raw_json_response(status, bytes),
        Err(e) => error_response(AttestError::Internal(format!("serialization failed: {}", e))),
    }
}

fn raw_json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Error response with a public message only
pub fn error_response(err: AttestError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    raw_json_response(status, body.into_bytes())
}

async fn read_body(req: Request<Incoming>) -> Result<Bytes> {
    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| AttestError::InvalidInput(format!("Failed to read body: {}", e)))?
        .to_bytes();

    if bytes.len() > MAX_BODY_BYTES {
        return Err(AttestError::InvalidInput(format!(
            "Body exceeds {} bytes",
            MAX_BODY_BYTES
        )));
    }
    Ok(bytes)
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Read and parse a required JSON body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let bytes = read_body(req).await?;
    if is_blank(&bytes) {
        return Err(AttestError::InvalidInput("Request body is required".to_string()));
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Read a JSON body, treating an empty body as `T::default()`
pub async fn read_json_or_default<T>(req: Request<Incoming>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let bytes = read_body(req).await?;
    if is_blank(&bytes) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Parse the query string into `T`
pub fn parse_query<T>(req: &Request<Incoming>) -> Result<T>
where
    T: DeserializeOwned,
{
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| AttestError::InvalidInput(format!("Invalid query: {}", e)))
}

/// Client address for audit entries: first `X-Forwarded-For` hop, else the
/// peer address
pub fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| addr.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded() {
        let addr: SocketAddr = "10.0.0.1:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, addr), "10.0.0.1");

        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9, 10.0.0.2"));
        assert_eq!(client_ip(&headers, addr), "203.0.113.9");
    }

    #[test]
    fn test_error_response_hides_detail() {
        let response = error_response(AttestError::Database("connection reset by 10.1.1.1".into()));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }
}
