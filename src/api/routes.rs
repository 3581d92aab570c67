use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::middleware::{authenticate, request_context};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_routes = Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/logout-all", post(handlers::logout_all))
        .route("/auth/session", get(handlers::current_session))
        .route("/auth/sessions", get(handlers::list_sessions));

    let internal_routes = Router::new().route("/_internal/health", get(handlers::health));

    // Layer order is outermost-last: TraceLayer wraps the context scope,
    // which wraps authentication, which wraps the handlers.
    Router::new()
        .merge(auth_routes)
        .merge(internal_routes)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            authenticate,
        ))
        .layer(middleware::from_fn(request_context))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
