//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling; one spawned task
//! per connection, routing by `match (Method, path)`.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::db::{MongoClient, UserStore};
use crate::notify::{LogNotifier, Notifier};
use crate::routes::{self, empty_body, full_body, BoxBody};
use crate::types::LecternError;
use crate::workflow::{MemoryTableStore, TableStore};

/// Shared application state
pub struct AppState {
    pub args: Args,
    pub started_at: Instant,
    /// Present when a MongoDB connection backs the portal
    pub mongo: Option<MongoClient>,
    pub users: Arc<UserStore>,
    pub store: Arc<dyn TableStore>,
    pub notifier: Arc<dyn Notifier>,
    pub jwt: JwtValidator,
}

impl AppState {
    /// State backed entirely by in-memory stores (dev mode, tests)
    pub fn memory(args: Args, jwt: JwtValidator) -> Self {
        Self {
            args,
            started_at: Instant::now(),
            mongo: None,
            users: Arc::new(UserStore::memory()),
            store: Arc::new(MemoryTableStore::new()),
            notifier: Arc::new(LogNotifier),
            jwt,
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<(), LecternError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Lectern listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - data may not be persisted");
    }

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
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // Prefix routers consume the request
    if path.starts_with("/auth") {
        if let Some(response) = routes::handle_auth_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(not_found_response(&path));
    }

    if path == "/tables" || path.starts_with("/tables/") {
        if let Some(response) = routes::handle_table_request(req, Arc::clone(&state)).await {
            return Ok(response);
        }
        return Ok(not_found_response(&path));
    }

    if path == "/change-requests" || path.starts_with("/change-requests/") {
        if let Some(response) =
            routes::handle_change_request_routes(req, Arc::clone(&state)).await
        {
            return Ok(response);
        }
        return Ok(not_found_response(&path));
    }

    let response = match (method, path.as_str()) {
        // Liveness probe - returns 200 while the service is running
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            routes::health_check(Arc::clone(&state))
        }

        // Readiness probe - requires the document store
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            routes::readiness_check(Arc::clone(&state))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => routes::version_info(),

        // CORS preflight
        (Method::OPTIONS, _) => preflight_response(),

        _ => not_found_response(&path),
    };

    Ok(response)
}

/// CORS preflight response
fn preflight_response() -> Response<BoxBody> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS")
        .body(empty_body())
        .unwrap()
}

/// Not found response
fn not_found_response(path: &str) -> Response<BoxBody> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });

    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header("Content-Type", "application/json")
        .body(full_body(body.to_string()))
        .unwrap()
}
