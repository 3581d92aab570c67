//! End-to-end integration tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use journal_auth::auth::{ClientMeta, SessionManager};
use journal_auth::config::SessionConfig;
use journal_auth::context::{self, RequestContext};
use journal_auth::logger::{ColorChoice, LogLevel, Logger, LoggerConfig, MemorySink};
use journal_auth::storage::models::{AuthProvider, SessionRecord, UserRecord};
use journal_auth::storage::Database;
use journal_auth::tokens::derive_session_id;

fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open(temp_dir.path()).unwrap();
    (db, temp_dir)
}

fn capture_logger(level: LogLevel) -> (Logger, MemorySink) {
    let sink = MemorySink::new();
    let config = LoggerConfig {
        colors: ColorChoice::Never,
        level,
        ..LoggerConfig::default()
    };
    (Logger::with_sink(config, Arc::new(sink.clone())), sink)
}

fn make_manager(db: &Database) -> SessionManager {
    let (logger, _) = capture_logger(LogLevel::Fatal);
    SessionManager::new(db.clone(), SessionConfig::default(), &logger)
}

fn make_user(id: &str, username: &str) -> UserRecord {
    let now = Utc::now();
    UserRecord {
        auth_provider: AuthProvider::Password,
        avatar_url: None,
        bio_text: String::new(),
        created_at: now,
        email: format!("{username}@example.com"),
        id: id.to_string(),
        password_hash: Some("$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string()),
        updated_at: now,
        username: username.to_string(),
        username_display: username.to_string(),
    }
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (db, _temp) = setup_db();
    let manager = make_manager(&db);
    db.put_user(&make_user("user-123", "ayla")).unwrap();

    // Create a session and validate with the returned token
    let created = manager
        .create_session("user-123", ClientMeta::default())
        .unwrap();
    let identity = manager
        .validate_client_token(&created.client_token)
        .unwrap()
        .expect("fresh session should validate");
    assert_eq!(identity.session.user_id, "user-123");
    assert_eq!(identity.user.username, "ayla");

    // Invalidate it
    manager
        .invalidate_client_token(&created.client_token)
        .unwrap();

    // Verify it's gone
    assert!(manager
        .validate_client_token(&created.client_token)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_multiple_sessions_per_user_and_global_logout() {
    let (db, _temp) = setup_db();
    let manager = make_manager(&db);
    db.put_user(&make_user("user-456", "finn")).unwrap();

    let s1 = manager.create_session("user-456", ClientMeta::default()).unwrap();
    let s2 = manager.create_session("user-456", ClientMeta::default()).unwrap();
    assert_ne!(s1.session_id, s2.session_id);
    assert_eq!(db.get_sessions_for_user("user-456").unwrap().len(), 2);

    // "Log out everywhere" kills both tokens
    assert_eq!(manager.invalidate_all_for_user("user-456").unwrap(), 2);
    assert!(manager.validate_client_token(&s1.client_token).unwrap().is_none());
    assert!(manager.validate_client_token(&s2.client_token).unwrap().is_none());
}

#[tokio::test]
async fn test_expired_session_removed_by_validation() {
    let (db, _temp) = setup_db();
    let manager = make_manager(&db);
    db.put_user(&make_user("user-1", "ayla")).unwrap();

    let token = "stale-client-token";
    let session_id = derive_session_id(token);
    let now = Utc::now();
    db.put_session(&SessionRecord {
        created_at: now - chrono::Duration::days(31),
        expires_at: now - chrono::Duration::days(1),
        id: session_id.clone(),
        ip_address: None,
        user_agent: None,
        user_id: "user-1".to_string(),
    })
    .unwrap();

    assert!(manager.validate_client_token(token).unwrap().is_none());
    // Validation performed the eager delete
    assert!(db.get_session(&session_id).unwrap().is_none());
}

#[tokio::test]
async fn test_background_sweep_removes_abandoned_sessions() {
    let (db, _temp) = setup_db();
    let now = Utc::now();

    // An abandoned session nobody will ever present again
    db.put_session(&SessionRecord {
        created_at: now - chrono::Duration::days(40),
        expires_at: now - chrono::Duration::days(10),
        id: "abandoned".to_string(),
        ip_address: None,
        user_agent: None,
        user_id: "user-1".to_string(),
    })
    .unwrap();

    assert_eq!(db.delete_expired_sessions().unwrap(), 1);
    assert!(db.get_session("abandoned").unwrap().is_none());
}

#[tokio::test]
async fn test_orphaned_session_self_heals() {
    let (db, _temp) = setup_db();
    let manager = make_manager(&db);

    let token = "orphan-token";
    let session_id = derive_session_id(token);
    let now = Utc::now();
    db.put_session(&SessionRecord {
        created_at: now,
        expires_at: now + chrono::Duration::days(30),
        id: session_id.clone(),
        ip_address: None,
        user_agent: None,
        user_id: "deleted-user".to_string(),
    })
    .unwrap();

    assert!(manager.validate_client_token(token).unwrap().is_none());
    assert!(db.get_session(&session_id).unwrap().is_none());
}

#[tokio::test]
async fn test_refresh_window() {
    let (db, _temp) = setup_db();
    let manager = make_manager(&db);
    let now = Utc::now();

    let record = |id: &str, days_left: i64| SessionRecord {
        created_at: now,
        expires_at: now + chrono::Duration::days(days_left),
        id: id.to_string(),
        ip_address: None,
        user_agent: None,
        user_id: "user-1".to_string(),
    };

    db.put_session(&record("near-expiry", 1)).unwrap();
    db.put_session(&record("far-from-expiry", 20)).unwrap();

    // 1 day left, 7-day threshold: extended to ~now + 30 days
    let new_expiry = manager.refresh_session("near-expiry").unwrap().unwrap();
    let expected = now + chrono::Duration::days(30);
    assert!((new_expiry - expected).num_seconds().abs() < 5);

    // 20 days left: untouched, returns None
    assert!(manager.refresh_session("far-from-expiry").unwrap().is_none());
    assert_eq!(
        db.get_session("far-from-expiry").unwrap().unwrap().expires_at,
        now + chrono::Duration::days(20)
    );
}

#[tokio::test]
async fn test_concurrent_request_contexts_stay_isolated() {
    async fn simulated_request(name: &'static str) {
        let mut ctx = RequestContext::new();
        ctx.username = Some(name.to_string());
        let request_id = ctx.request_id.clone();

        context::scope(ctx, async move {
            for _ in 0..25 {
                tokio::time::sleep(Duration::from_millis(1)).await;
                let seen = context::current().unwrap();
                assert_eq!(seen.request_id, request_id);
                assert_eq!(seen.username.as_deref(), Some(name));
            }
        })
        .await;
    }

    let (a, b) = tokio::join!(
        tokio::spawn(simulated_request("alice")),
        tokio::spawn(simulated_request("bob"))
    );
    a.unwrap();
    b.unwrap();
}

#[tokio::test]
async fn test_audit_log_entries_carry_request_context() {
    let (db, _temp) = setup_db();
    let (logger, sink) = capture_logger(LogLevel::Debug);
    let manager = SessionManager::new(db.clone(), SessionConfig::default(), &logger);
    db.put_user(&make_user("user-1", "ayla")).unwrap();

    let mut ctx = RequestContext::new();
    ctx.path = Some("/auth/login".to_string());
    let request_id = ctx.request_id.clone();

    context::scope(ctx, async {
        manager.create_session("user-1", ClientMeta::default()).unwrap();
    })
    .await;

    let entries = sink.entries();
    let created = entries
        .iter()
        .find(|e| e.message == "Created session")
        .expect("session creation should be logged");
    assert_eq!(
        created.context.get("request_id").and_then(|v| v.as_str()),
        Some(request_id.as_str())
    );
    assert_eq!(
        created.context.get("service").and_then(|v| v.as_str()),
        Some("session_manager")
    );
    assert_eq!(
        created.context.get("path").and_then(|v| v.as_str()),
        Some("/auth/login")
    );
}

#[tokio::test]
async fn test_child_scope_does_not_leak_into_parent() {
    context::scope(RequestContext::new(), async {
        let overrides = BTreeMap::from([("operation".to_string(), "sweep".to_string())]);
        context::child_scope(overrides, async {
            assert_eq!(
                context::current().unwrap().extra.get("operation").map(String::as_str),
                Some("sweep")
            );
        })
        .await;

        assert!(context::current().unwrap().extra.is_empty());
    })
    .await;
}
