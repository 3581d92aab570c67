//! journal-auth - session authentication and request tracing for the journal
//! platform
//!
//! This crate is the authentication core consumed by the journal CRUD layer:
//! - Opaque session tokens, hashed one-way into server-side session ids
//! - redb-backed session and user storage with active expiration
//! - Sliding-window session refresh with a hard lifespan ceiling
//! - Task-local request context propagation for correlated audit logging
//! - REST API for the session-issuance boundary (register/login/logout)

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod expiration;
pub mod logger;
pub mod storage;
#[cfg(test)]
pub mod testutil;
pub mod tokens;

use auth::SessionManager;
use config::Config;
use logger::Logger;
use storage::Database;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub logger: Logger,
    pub sessions: SessionManager,
}
