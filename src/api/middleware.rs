//! Request-context and authentication middleware.
//!
//! `request_context` runs first and establishes the ambient context for the
//! rest of the request. `authenticate` runs inside that scope: it resolves
//! the cookie token into an identity slot, enriches the context, performs the
//! sliding refresh, and re-issues the cookie when the session was extended.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::SET_COOKIE;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::api::cookies;
use crate::context::{self, RequestContext};
use crate::logger::fields;
use crate::storage::models::{SafeUser, SessionHandle};
use crate::AppState;

/// Identity slot populated for every request. Both fields are explicitly
/// `None` when the request carries no valid session, so downstream handlers
/// treat "logged out" uniformly.
#[derive(Debug, Clone, Default)]
pub struct CurrentIdentity {
    pub session: Option<SessionHandle>,
    pub user: Option<SafeUser>,
}

/// Establish the request-scoped context; everything downstream (including
/// the authenticate middleware) can call `context::current()`.
pub async fn request_context(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let peer_addr = connect_info.map(|ConnectInfo(addr)| addr);
    let ctx = RequestContext::from_request(
        request.method(),
        request.uri(),
        request.headers(),
        peer_addr,
    );
    context::scope(ctx, next.run(request)).await
}

/// Resolve the cookie-carried token into the request's identity slot.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token =
        cookies::token_from_headers(request.headers(), &state.config.sessions.cookie_name);

    let mut identity = CurrentIdentity::default();
    let mut refreshed: Option<(String, DateTime<Utc>)> = None;

    if let Some(token) = token {
        match state.sessions.validate_client_token(&token) {
            Ok(Some(auth)) => {
                context::enrich(|ctx| {
                    ctx.session_id = Some(auth.session.id.clone());
                    ctx.user_id = Some(auth.user.id.clone());
                    ctx.username = Some(auth.user.username.clone());
                });

                // Validation happens-before refresh; the refresh reads the
                // record validation just confirmed
                match state.sessions.refresh_session(&auth.session.id) {
                    Ok(Some(new_expiry)) => refreshed = Some((token.clone(), new_expiry)),
                    Ok(None) => {}
                    Err(e) => {
                        state.logger.for_request().warn(
                            "Session refresh failed",
                            Some(fields([("error", Value::from(e.to_string()))])),
                        );
                    }
                }

                identity = CurrentIdentity {
                    session: Some(auth.session),
                    user: Some(auth.user),
                };
            }
            Ok(None) => {}
            Err(e) => {
                // Read-path storage failure: degrade to unauthenticated
                // rather than failing the whole request
                state
                    .logger
                    .for_request()
                    .error("Session validation unavailable", Some(&e), None);
            }
        }
    }

    request.extensions_mut().insert(identity);
    let mut response = next.run(request).await;

    if let Some((token, expires_at)) = refreshed {
        response.headers_mut().append(
            SET_COOKIE,
            cookies::session_cookie(&state.config.sessions, &token, &expires_at),
        );
    }

    response
}
