use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Google,
    #[default]
    Password,
}

/// A session record, keyed by the one-way hash of the client token.
///
/// The raw token never appears here; only the client holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    /// When the session was created
    pub created_at: DateTime<Utc>,
    /// Absolute expiry; the only field ever mutated after creation
    pub expires_at: DateTime<Utc>,
    /// SHA-256 hex of the client token; doubles as the primary key
    pub id: String,
    /// Client address captured at creation (audit only)
    pub ip_address: Option<String>,
    /// Raw User-Agent captured at creation (audit only)
    pub user_agent: Option<String>,
    /// The owning user
    pub user_id: String,
}

impl SessionRecord {
    /// The serialized view handed to request-scoped state and responses.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            expires_at: self.expires_at,
            id: self.id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Serialized session as exposed outside the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHandle {
    pub expires_at: DateTime<Utc>,
    pub id: String,
    pub user_id: String,
}

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub auth_provider: AuthProvider,
    pub avatar_url: Option<String>,
    pub bio_text: String,
    pub created_at: DateTime<Utc>,
    /// Stored lowercased; uniqueness enforced via the EMAILS index
    pub email: String,
    pub id: String,
    /// PHC-formatted Argon2id hash; None for OAuth-only accounts
    pub password_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Canonical handle; uniqueness enforced via the USERNAMES index
    pub username: String,
    /// Display casing/variant of the handle
    pub username_display: String,
}

impl UserRecord {
    /// Externally safe projection: everything a client may see, nothing it
    /// must not (no password hash, no provider-internal ids).
    pub fn sanitized(&self) -> SafeUser {
        SafeUser {
            auth_provider: self.auth_provider,
            avatar_url: self.avatar_url.clone(),
            bio_text: self.bio_text.clone(),
            created_at: self.created_at,
            email: self.email.clone(),
            id: self.id.clone(),
            updated_at: self.updated_at,
            username: self.username.clone(),
            username_display: self.username_display.clone(),
        }
    }
}

/// Sanitized user projection assigned to request-scoped state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafeUser {
    pub auth_provider: AuthProvider,
    pub avatar_url: Option<String>,
    pub bio_text: String,
    pub created_at: DateTime<Utc>,
    pub email: String,
    pub id: String,
    pub updated_at: DateTime<Utc>,
    pub username: String,
    pub username_display: String,
}
