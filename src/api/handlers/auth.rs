use std::sync::Arc;

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::api::cookies;
use crate::api::middleware::CurrentIdentity;
use crate::api::response::{ApiError, JSend};
use crate::auth::password;
use crate::auth::session::ClientMeta;
use crate::context;
use crate::logger::fields;
use crate::storage::models::{AuthProvider, SafeUser, SessionHandle, UserRecord};
use crate::AppState;

const MIN_PASSWORD_LENGTH: usize = 8;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub username: String,
    #[serde(default)]
    pub username_display: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email address
    pub identifier: String,
    pub password: String,
}

/// The identity slot, serialized. Both fields are null for a logged-out
/// request -- explicitly, never absent.
#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub session: Option<SessionHandle>,
    pub user: Option<SafeUser>,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub created_at: String,
    /// Whether this is the session making the request
    pub current: bool,
    pub expires_at: String,
    pub id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub revoked: usize,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_register(&req)?;

    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    // Availability checks; registration is a write path, storage failures
    // here are hard failures
    if state
        .db
        .get_user_by_username(&username)
        .map_err(|e| ApiError::internal(format!("Failed to check username: {e}")))?
        .is_some()
    {
        return Err(ApiError::conflict("Username is already taken"));
    }
    if state
        .db
        .get_user_by_email(&email)
        .map_err(|e| ApiError::internal(format!("Failed to check email: {e}")))?
        .is_some()
    {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let password_hash = password::hash_password_blocking(req.password)
        .await
        .map_err(|e| ApiError::internal(format!("Password hashing failed: {e}")))?;

    let now = Utc::now();
    let user = UserRecord {
        auth_provider: AuthProvider::Password,
        avatar_url: None,
        bio_text: String::new(),
        created_at: now,
        email,
        id: Uuid::new_v4().to_string(),
        password_hash: Some(password_hash),
        updated_at: now,
        username: username.clone(),
        username_display: req.username_display.unwrap_or_else(|| username.clone()),
    };
    state
        .db
        .put_user(&user)
        .map_err(|e| ApiError::internal(format!("Failed to store user: {e}")))?;

    let cookie = issue_session(&state, &user.id)?;

    state.logger.for_request().info(
        "User registered",
        Some(fields([
            ("user_id", Value::from(user.id.clone())),
            ("username", Value::from(user.username.clone())),
        ])),
    );

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, cookie)],
        JSend::success(user.sanitized()),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.identifier.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("identifier and password are required"));
    }

    let timer = state.logger.for_request().start_timer();

    let identifier = req.identifier.trim();
    let user = if identifier.contains('@') {
        state.db.get_user_by_email(identifier)
    } else {
        state.db.get_user_by_username(identifier)
    }
    .map_err(|e| ApiError::internal(format!("Failed to load user: {e}")))?;

    let Some(user) = user else {
        return Err(ApiError::unauthorized("Invalid credentials"));
    };
    let Some(stored_hash) = user.password_hash.clone() else {
        // OAuth-only account; no password to verify against
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    let verified = password::verify_password_blocking(req.password, stored_hash)
        .await
        .map_err(|e| ApiError::internal(format!("Password verification failed: {e}")))?;
    if !verified {
        state.logger.for_request().warn(
            "Login rejected: wrong password",
            Some(fields([("username", Value::from(user.username.clone()))])),
        );
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    context::enrich(|ctx| {
        ctx.user_id = Some(user.id.clone());
        ctx.username = Some(user.username.clone());
    });

    let cookie = issue_session(&state, &user.id)?;

    timer.end(
        "Login completed",
        Some(fields([("username", Value::from(user.username.clone()))])),
    );

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        JSend::success(user.sanitized()),
    ))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = cookies::token_from_headers(&headers, &state.config.sessions.cookie_name)
    {
        // Logout is a write path: storage failure must not pretend success
        state
            .sessions
            .invalidate_client_token(&token)
            .map_err(|e| ApiError::internal(format!("Failed to invalidate session: {e}")))?;
    }

    state.logger.for_request().info("Logged out", None);

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookies::clear_session_cookie(&state.config.sessions))],
        JSend::success(()),
    ))
}

pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<CurrentIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(user) = identity.user else {
        return Err(ApiError::unauthorized("Authentication required"));
    };

    let revoked = state
        .sessions
        .invalidate_all_for_user(&user.id)
        .map_err(|e| ApiError::internal(format!("Failed to invalidate sessions: {e}")))?;

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, cookies::clear_session_cookie(&state.config.sessions))],
        JSend::success(LogoutAllResponse { revoked }),
    ))
}

/// The identity established for this request; both slots null when logged out.
pub async fn current_session(
    Extension(identity): Extension<CurrentIdentity>,
) -> Json<JSend<IdentityResponse>> {
    JSend::success(IdentityResponse {
        session: identity.session,
        user: identity.user,
    })
}

/// Active sessions for the authenticated user (device audit view).
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<CurrentIdentity>,
) -> Result<Json<JSend<Vec<SessionSummary>>>, ApiError> {
    let Some(user) = identity.user else {
        return Err(ApiError::unauthorized("Authentication required"));
    };

    let sessions = state
        .db
        .get_sessions_for_user(&user.id)
        .map_err(|e| ApiError::internal(format!("Failed to list sessions: {e}")))?;

    let current_id = identity.session.map(|s| s.id);
    let now = Utc::now();
    let items: Vec<SessionSummary> = sessions
        .iter()
        .filter(|s| s.expires_at > now)
        .map(|s| SessionSummary {
            created_at: s.created_at.to_rfc3339(),
            current: Some(&s.id) == current_id.as_ref(),
            expires_at: s.expires_at.to_rfc3339(),
            id: s.id.clone(),
            ip_address: s.ip_address.clone(),
            user_agent: s.user_agent.clone(),
        })
        .collect();

    Ok(JSend::success(items))
}

// ============================================================================
// Helpers
// ============================================================================

/// Create a session for the user and render its cookie. Client metadata
/// comes from the ambient request context.
fn issue_session(state: &AppState, user_id: &str) -> Result<HeaderValue, ApiError> {
    let meta = match context::current() {
        Some(ctx) => ClientMeta {
            ip_address: ctx.ip,
            user_agent: ctx.user_agent,
        },
        None => ClientMeta::default(),
    };

    let created = state
        .sessions
        .create_session(user_id, meta)
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    context::enrich(|ctx| ctx.session_id = Some(created.session_id.clone()));

    Ok(cookies::session_cookie(
        &state.config.sessions,
        &created.client_token,
        &created.expires_at,
    ))
}

fn validate_register(req: &RegisterRequest) -> Result<(), ApiError> {
    let username = req.username.trim();
    if username.len() < 3
        || username.len() > 20
        || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::bad_request(
            "Username must be 3-20 characters and contain only letters, numbers, and underscores",
        ));
    }

    let email = req.email.trim();
    if email.is_empty() || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ApiError::bad_request("A valid email address is required"));
    }

    if let Err(message) = password::validate_password_strength(&req.password, MIN_PASSWORD_LENGTH) {
        return Err(ApiError::bad_request(message));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register_request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            username: username.to_string(),
            username_display: None,
        }
    }

    #[test]
    fn test_validate_register_accepts_good_input() {
        let req = register_request("ayla_22", "ayla@example.com", "long enough 1");
        assert!(validate_register(&req).is_ok());
    }

    #[test]
    fn test_validate_register_rejects_bad_usernames() {
        for username in ["ab", "way_too_long_for_a_username", "spaces here", "dash-ed"] {
            let req = register_request(username, "a@example.com", "long enough 1");
            assert!(validate_register(&req).is_err(), "accepted {username:?}");
        }
    }

    #[test]
    fn test_validate_register_rejects_bad_emails() {
        for email in ["", "plain", "@nodomain", "user@"] {
            let req = register_request("ayla", email, "long enough 1");
            assert!(validate_register(&req).is_err(), "accepted {email:?}");
        }
    }

    #[test]
    fn test_validate_register_rejects_short_passwords() {
        let req = register_request("ayla", "a@example.com", "short");
        assert!(validate_register(&req).is_err());
    }
}
