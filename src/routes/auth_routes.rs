//! HTTP routes for authentication
//!
//! - POST /auth/register       - Create portal credentials
//! - POST /auth/login          - Authenticate and get a JWT token
//! - POST /auth/reset-password - Request a password reset
//! - GET  /auth/me             - Current user info from token
//!
//! Register and reset-password answer with the same success-shaped body
//! whether or not the identifier exists, so the endpoints cannot be used
//! to enumerate accounts. Login failures are a single generic message
//! for the same reason.

use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::auth::{hash_password, verify_password, PermissionLevel, TokenInput};
use crate::db::schemas::UserDoc;
use crate::routes::{
    authenticate, cors_preflight, error_response, json_response, parse_json_body, BoxBody,
    ErrorResponse,
};
use crate::server::AppState;
use crate::types::LecternError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default = "default_identifier_type")]
    pub identifier_type: String,
}

fn default_identifier_type() -> String {
    "email".to_string()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub identifier: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user_id: String,
    pub identifier: String,
    pub display_name: String,
    pub permission_level: String,
    pub expires_at: u64,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user_id: String,
    pub identifier: String,
    pub display_name: String,
    pub permission_level: String,
}

/// POST /auth/register
///
/// The first registered account is granted admin so a fresh deployment
/// can bootstrap itself; every later account starts as authenticated.
async fn handle_register(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let body: RegisterRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    if body.identifier.trim().is_empty() || body.password.is_empty() {
        return json_response(
            StatusCode::BAD_REQUEST,
            &ErrorResponse {
                error: "Missing required fields: identifier, password".into(),
            },
        );
    }

    if body.password.len() < 8 {
        return json_response(
            StatusCode::BAD_REQUEST,
            &ErrorResponse {
                error: "Password must be at least 8 characters".into(),
            },
        );
    }

    let display_name = if body.display_name.is_empty() {
        body.identifier
            .split('@')
            .next()
            .unwrap_or("User")
            .to_string()
    } else {
        body.display_name.clone()
    };

    let password_hash = match hash_password(&body.password) {
        Ok(h) => h,
        Err(e) => return error_response(&e),
    };

    let permission_level = match state.users.is_empty().await {
        Ok(true) => PermissionLevel::Admin,
        Ok(false) => PermissionLevel::Authenticated,
        Err(e) => return error_response(&e),
    };

    let user = UserDoc::new(
        body.identifier.trim().to_string(),
        body.identifier_type,
        display_name,
        password_hash,
        permission_level,
    );

    // The response is identical for a taken identifier; only the log
    // distinguishes the outcomes.
    match state.users.insert(user).await {
        Ok(user_id) => {
            info!(user_id = %user_id, level = %permission_level, "Registered user");
        }
        Err(LecternError::Conflict(_)) => {
            warn!("Registration attempted with an existing identifier");
        }
        Err(e) => return error_response(&e),
    }

    json_response(
        StatusCode::OK,
        &MessageResponse {
            message: "Registration accepted. You can now log in.".into(),
        },
    )
}

/// POST /auth/login
async fn handle_login(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let body: LoginRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    let invalid_credentials = || {
        json_response(
            StatusCode::UNAUTHORIZED,
            &ErrorResponse {
                error: "Invalid credentials".into(),
            },
        )
    };

    let user = match state.users.find_by_identifier(body.identifier.trim()).await {
        Ok(Some(u)) => u,
        Ok(None) => return invalid_credentials(),
        Err(e) => return error_response(&e),
    };

    if !user.is_active {
        return invalid_credentials();
    }

    match verify_password(&body.password, &user.password_hash) {
        Ok(true) => {}
        Ok(false) => return invalid_credentials(),
        Err(e) => return error_response(&e),
    }

    let user_id = user._id.map(|id| id.to_hex()).unwrap_or_default();

    let token = match state.jwt.generate_token(TokenInput {
        user_id: user_id.clone(),
        identifier: user.identifier.clone(),
        display_name: user.display_name.clone(),
        permission_level: user.permission_level,
    }) {
        Ok(t) => t,
        Err(e) => return error_response(&e),
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    info!(user_id = %user_id, "User logged in");

    json_response(
        StatusCode::OK,
        &AuthResponse {
            token,
            user_id,
            identifier: user.identifier,
            display_name: user.display_name,
            permission_level: user.permission_level.to_string(),
            expires_at: now + state.jwt.expiry_seconds(),
        },
    )
}

/// POST /auth/reset-password
///
/// Issues reset instructions out of band when the account exists. The
/// response never says whether it does.
async fn handle_reset_password(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let body: ResetPasswordRequest = match parse_json_body(req).await {
        Ok(b) => b,
        Err(e) => return error_response(&e),
    };

    match state.users.find_by_identifier(body.identifier.trim()).await {
        Ok(Some(user)) => {
            info!(user_id = ?user._id, "Password reset requested");
        }
        Ok(None) => {
            warn!("Password reset requested for unknown identifier");
        }
        Err(e) => return error_response(&e),
    }

    json_response(
        StatusCode::OK,
        &MessageResponse {
            message: "If the account exists, reset instructions have been issued.".into(),
        },
    )
}

/// GET /auth/me
async fn handle_me(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Response<BoxBody> {
    let claims = match authenticate(&req, &state) {
        Ok(c) => c,
        Err(e) => return error_response(&e),
    };

    json_response(
        StatusCode::OK,
        &MeResponse {
            user_id: claims.user_id,
            identifier: claims.identifier,
            display_name: claims.display_name,
            permission_level: claims.permission_level.to_string(),
        },
    )
}

/// Route /auth/* requests. Returns None when the path is not ours.
pub async fn handle_auth_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<AppState>,
) -> Option<Response<BoxBody>> {
    let path = req.uri().path();
    let method = req.method().clone();

    if !path.starts_with("/auth") {
        return None;
    }

    if method == Method::OPTIONS {
        return Some(cors_preflight());
    }

    let path = path.split('?').next().unwrap_or(path).to_string();

    let response = match (&method, path.as_str()) {
        (&Method::POST, "/auth/register") => handle_register(req, state).await,
        (&Method::POST, "/auth/login") => handle_login(req, state).await,
        (&Method::POST, "/auth/reset-password") => handle_reset_password(req, state).await,
        (&Method::GET, "/auth/me") => handle_me(req, state).await,
        _ => json_response(
            StatusCode::NOT_FOUND,
            &ErrorResponse {
                error: "Not found".into(),
            },
        ),
    };

    Some(response)
}
