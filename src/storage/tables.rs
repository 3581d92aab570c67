use redb::TableDefinition;

/// Sessions: session_id (token hash) -> SessionRecord (msgpack)
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Secondary index: user_id -> Vec<session_id> (for per-user listing and bulk revocation)
pub const USER_SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("user_sessions");

/// Expiration index: "{expires_at_ms:020}:{session_id}" -> session_id
/// Key ordering doubles as expiry ordering, so sweeps never scan live records.
pub const SESSION_EXPIRY: TableDefinition<&str, &str> = TableDefinition::new("session_expiry");

/// Users: user_id -> UserRecord (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Unique index: lowercased username -> user_id
pub const USERNAMES: TableDefinition<&str, &str> = TableDefinition::new("usernames");

/// Unique index: lowercased email -> user_id
pub const EMAILS: TableDefinition<&str, &str> = TableDefinition::new("emails");
