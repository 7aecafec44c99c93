//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::{Session, SessionValidator};
use crate::config::{Args, ConfigSource};
use crate::db::AttestationStore;
use crate::routes::{self, error_response, grades::parse_grade_path, json_response};
use crate::services::{
    spawn_confirmation_task, Actor, AuditLog, ClientFactory, ConfirmationTracker,
    ConnectionManager, GradeWorkflow, ModeSelector, RecordVerifier, TransactionSubmitter,
};
use crate::types::{AttestError, Result};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Lifetime of tokens issued by `SessionValidator::issue`
const SESSION_EXPIRY_SECS: u64 = 3600;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Data-access handle shared by every service
    pub store: Arc<dyn AttestationStore>,
    /// "mongodb" or "memory"
    pub store_backend: &'static str,
    pub sessions: SessionValidator,
    pub audit: Arc<AuditLog>,
    pub connection: Arc<ConnectionManager>,
    pub submitter: Arc<TransactionSubmitter>,
    pub verifier: Arc<RecordVerifier>,
    pub grades: Arc<GradeWorkflow>,
    pub confirmations: Arc<ConfirmationTracker>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the services around one store and one ledger config source
    pub fn new(
        args: Args,
        store: Arc<dyn AttestationStore>,
        store_backend: &'static str,
        config_source: Arc<dyn ConfigSource>,
        client_factory: ClientFactory,
    ) -> Result<Self> {
        let secret = args.jwt_secret().ok_or_else(|| {
            AttestError::Config("JWT_SECRET is required in production mode".to_string())
        })?;
        let sessions = SessionValidator::new(secret, SESSION_EXPIRY_SECS)?;

        let audit = Arc::new(AuditLog::new(Arc::clone(&store)));
        let connection = Arc::new(ConnectionManager::new(
            config_source,
            client_factory,
            Arc::clone(&audit),
        )?);
        let selector = Arc::new(ModeSelector::new(Arc::clone(&connection), Arc::clone(&audit)));
        let submitter = Arc::new(TransactionSubmitter::new(
            Arc::clone(&selector),
            Arc::clone(&store),
            Arc::clone(&audit),
        ));
        let verifier = Arc::new(RecordVerifier::new(Arc::clone(&selector), Arc::clone(&audit)));
        let grades = Arc::new(GradeWorkflow::new(
            Arc::clone(&store),
            Arc::clone(&submitter),
            Arc::clone(&verifier),
        ));
        let confirmations = Arc::new(
            ConfirmationTracker::new(Arc::clone(&store), Arc::clone(&connection))
                .with_batch_size(args.confirmation_batch_size),
        );

        Ok(Self {
            args,
            store,
            store_backend,
            sessions,
            audit,
            connection,
            submitter,
            verifier,
            grades,
            confirmations,
            started_at: Instant::now(),
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("grade-attest listening on {}", state.args.listen);

    if state.args.dev_mode {
        warn!("Development mode enabled - dev JWT secret accepted");
    }

    let connected = state.connection.check_connection().await;
    let ledger = state.connection.state().await;
    info!(
        connected = connected,
        mock_mode = ledger.mock_mode,
        "Initial ledger connection check"
    );

    spawn_confirmation_task(
        Arc::clone(&state.confirmations),
        Duration::from_secs(state.args.confirmation_poll_secs),
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .title_case_headers(true)
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => preflight_response(),

        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            routes::health_check(&state).await
        }

        _ if path.starts_with("/api/") => {
            match handle_api(&state, addr, &method, &path, req).await {
                Ok(response) => response,
                Err(err) => {
                    log_error(&method, &path, &err);
                    error_response(err)
                }
            }
        }

        _ => not_found_response(&path),
    };

    Ok(to_boxed(response))
}

/// Authenticated `/api/*` routes
async fn handle_api(
    state: &AppState,
    addr: SocketAddr,
    method: &Method,
    path: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());
    let session: Session = state.sessions.authenticate(auth_header)?;
    let actor = Actor::from_session(&session, Some(routes::client_ip(req.headers(), addr)));

    match (method, path) {
        (&Method::GET, "/api/blockchain/status") => routes::handle_status(state, &session).await,
        (&Method::POST, "/api/blockchain/reload") => {
            routes::handle_reload(state, &session, &actor, req).await
        }
        (&Method::GET, "/api/blockchain/audit") => {
            routes::handle_audit(state, &session, &req).await
        }
        (&Method::POST, "/api/blockchain/confirmations") => {
            routes::handle_confirmations(state, &session).await
        }
        (&Method::POST, "/api/blockchain/submit") => {
            routes::handle_submit(state, &session, &actor, req).await
        }
        (&Method::POST, "/api/blockchain/verify") => {
            routes::handle_verify(state, &session, &actor, req).await
        }
        (&Method::POST, "/api/grades") => routes::handle_create_grade(state, &session, req).await,
        _ => match (method, parse_grade_path(path)) {
            (&Method::GET, Some((id, ""))) => routes::handle_get_grade(state, &session, id).await,
            (&Method::POST, Some((id, "attest"))) => {
                routes::handle_attest(state, &session, &actor, id).await
            }
            (&Method::POST, Some((id, "verify"))) => {
                routes::handle_verify_grade(state, &session, &actor, id).await
            }
            (&Method::PUT, Some((id, "score"))) => {
                routes::handle_edit_score(state, &session, &actor, id, req).await
            }
            _ => Ok(not_found_response(path)),
        },
    }
}

fn log_error(method: &Method, path: &str, err: &AttestError) {
    if err.status_code().is_server_error() {
        error!(method = %method, path = %path, error = %err, "Request failed");
    } else {
        debug!(method = %method, path = %path, error = %err, "Request rejected");
    }
}

/// Convert a Full<Bytes> body to BoxBody
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, OPTIONS"),
    );
    response
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({
            "error": "Not Found",
            "path": path,
        }),
    )
}
