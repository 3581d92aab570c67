//! Shared test helpers — available to all `#[cfg(test)]` modules in the crate.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use crate::auth::SessionManager;
use crate::config::SessionConfig;
use crate::logger::{ColorChoice, LogLevel, Logger, LoggerConfig, MemorySink};
use crate::storage::models::{AuthProvider, SessionRecord, UserRecord};
use crate::storage::Database;

/// Open a fresh database in a temporary directory.
///
/// Returns both the `Database` and the `TempDir` guard — the caller must
/// keep the `TempDir` alive for the duration of the test.
pub fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

/// A logger that swallows everything below fatal into a memory sink, keeping
/// test output quiet.
pub fn quiet_logger() -> Logger {
    let config = LoggerConfig {
        colors: ColorChoice::Never,
        level: LogLevel::Fatal,
        ..LoggerConfig::default()
    };
    Logger::with_sink(config, Arc::new(MemorySink::new()))
}

/// A `SessionManager` with default timing (30-day lifespan, 7-day threshold)
/// over the given database.
pub fn test_manager(db: &Database) -> SessionManager {
    SessionManager::new(db.clone(), SessionConfig::default(), &quiet_logger())
}

/// Create a `SessionRecord` expiring `expires_in_hours` from now (negative
/// for an already-expired record).
pub fn make_session(id: &str, user_id: &str, expires_in_hours: i64) -> SessionRecord {
    let now = Utc::now();
    SessionRecord {
        created_at: now,
        expires_at: now + Duration::hours(expires_in_hours),
        id: id.to_string(),
        ip_address: None,
        user_agent: None,
        user_id: user_id.to_string(),
    }
}

/// Create a password-provider `UserRecord` with the given id and username.
pub fn make_user(id: &str, username: &str) -> UserRecord {
    let now = Utc::now();
    UserRecord {
        auth_provider: AuthProvider::Password,
        avatar_url: None,
        bio_text: String::new(),
        created_at: now,
        email: format!("{}@example.com", username.to_lowercase()),
        id: id.to_string(),
        password_hash: Some("$argon2id$v=19$m=19456,t=2,p=1$c2FsdHNhbHQ$aGFzaGhhc2g".to_string()),
        updated_at: now,
        username: username.to_string(),
        username_display: username.to_string(),
    }
}
