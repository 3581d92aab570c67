use redb::ReadableTable;

use super::db::{expiry_key, Database, DatabaseError};
use super::models::SessionRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // Session operations
    // ========================================================================

    /// Store a session record, replacing any existing record with the same id.
    ///
    /// Replacement is idempotent rather than an error: a colliding id is
    /// cryptographically implausible, and the replaced record's index entries
    /// are cleaned up inside the same write transaction.
    pub fn put_session(&self, session: &SessionRecord) -> Result<(), DatabaseError> {
        debug_assert!(!session.id.is_empty(), "session id must not be empty");
        debug_assert!(!session.user_id.is_empty(), "session user_id must not be empty");

        let write_txn = self.begin_write()?;
        {
            // Replace: drop any prior record's expiry-index entry first
            let existing: Option<SessionRecord> = {
                let table = write_txn.open_table(SESSIONS)?;
                let v = match table.get(session.id.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                v
            };

            if let Some(old) = existing {
                let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                let ek = expiry_key(&old.expires_at, &old.id);
                expiry_table.remove(ek.as_str())?;

                // If the prior record belonged to a different user, prune it
                // from that user's index as well
                if old.user_id != session.user_id {
                    remove_from_user_index(&write_txn, &old.user_id, &old.id)?;
                }
            }

            let mut table = write_txn.open_table(SESSIONS)?;
            let data = rmp_serde::to_vec_named(session)?;
            table.insert(session.id.as_str(), data.as_slice())?;

            // Update user_sessions index
            let mut index_table = write_txn.open_table(USER_SESSIONS)?;
            let mut session_ids: Vec<String> = index_table
                .get(session.user_id.as_str())?
                .map(|v| rmp_serde::from_slice(v.value()))
                .transpose()?
                .unwrap_or_default();

            if !session_ids.contains(&session.id) {
                session_ids.push(session.id.clone());
                let index_data = rmp_serde::to_vec_named(&session_ids)?;
                index_table.insert(session.user_id.as_str(), index_data.as_slice())?;
            }

            // Update expiration index
            let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
            let ek = expiry_key(&session.expires_at, &session.id);
            expiry_table.insert(ek.as_str(), session.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a session by id (point lookup by primary key)
    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(SESSIONS)?;

        match table.get(session_id)? {
            Some(data) => {
                let session: SessionRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Delete a session by id. Idempotent; returns whether a record existed.
    pub fn delete_session(&self, session_id: &str) -> Result<bool, DatabaseError> {
        let write_txn = self.begin_write()?;

        // First, get the session for index cleanup
        let session: Option<SessionRecord> = {
            let table = write_txn.open_table(SESSIONS)?;
            let v = match table.get(session_id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            v
        };

        let deleted = match session {
            Some(session) => {
                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    table.remove(session_id)?;
                }

                remove_from_user_index(&write_txn, &session.user_id, session_id)?;

                {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&session.expires_at, session_id);
                    expiry_table.remove(ek.as_str())?;
                }

                true
            }
            None => false,
        };

        write_txn.commit()?;
        Ok(deleted)
    }

    /// Extend a session's expiry, keeping the expiration index consistent.
    /// Returns the updated record, or None if the session no longer exists.
    pub fn update_session_expiry(
        &self,
        session_id: &str,
        new_expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<SessionRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing: Option<SessionRecord> = {
            let table = write_txn.open_table(SESSIONS)?;
            let v = match table.get(session_id)? {
                Some(data) => Some(rmp_serde::from_slice(data.value())?),
                None => None,
            };
            v
        };

        let updated = match existing {
            Some(mut session) => {
                {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let old_key = expiry_key(&session.expires_at, session_id);
                    expiry_table.remove(old_key.as_str())?;
                    let new_key = expiry_key(&new_expires_at, session_id);
                    expiry_table.insert(new_key.as_str(), session_id)?;
                }

                session.expires_at = new_expires_at;
                let data = rmp_serde::to_vec_named(&session)?;
                let mut table = write_txn.open_table(SESSIONS)?;
                table.insert(session_id, data.as_slice())?;
                Some(session)
            }
            None => None,
        };

        write_txn.commit()?;
        Ok(updated)
    }

    /// Delete every session owned by a user. Returns how many were removed.
    pub fn delete_sessions_for_user(&self, user_id: &str) -> Result<usize, DatabaseError> {
        let write_txn = self.begin_write()?;

        let session_ids: Vec<String> = {
            let index_table = write_txn.open_table(USER_SESSIONS)?;
            let v = match index_table.get(user_id)? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => Vec::new(),
            };
            v
        };

        let mut removed = 0;
        for session_id in &session_ids {
            let session: Option<SessionRecord> = {
                let table = write_txn.open_table(SESSIONS)?;
                let v = match table.get(session_id.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                v
            };

            if let Some(session) = session {
                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    table.remove(session_id.as_str())?;
                }
                {
                    let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                    let ek = expiry_key(&session.expires_at, session_id);
                    expiry_table.remove(ek.as_str())?;
                }
                removed += 1;
            }
        }

        {
            let mut index_table = write_txn.open_table(USER_SESSIONS)?;
            index_table.remove(user_id)?;
        }

        write_txn.commit()?;
        Ok(removed)
    }

    /// Delete expired sessions using the expiration index (no full table scan).
    pub fn delete_expired_sessions(&self) -> Result<usize, DatabaseError> {
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Phase 1: read the expiration index to collect expired entries.
        // Keys sort by expiry, so the first live entry ends the walk.
        let expired: Vec<(String, String)> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(SESSION_EXPIRY)?;
            let mut result = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                let key_str = key.value().to_string();
                match super::db::expiry_key_ms(&key_str) {
                    Some(ms) if ms <= now_ms => {
                        result.push((key_str, value.value().to_string()));
                    }
                    _ => break,
                }
            }
            result
        };

        if expired.is_empty() {
            return Ok(0);
        }

        // Phase 2: delete expired sessions and clean up all indexes
        let write_txn = self.begin_write()?;

        for (expiry_key_val, session_id) in &expired {
            let session: Option<SessionRecord> = {
                let table = write_txn.open_table(SESSIONS)?;
                let v = match table.get(session_id.as_str())? {
                    Some(data) => Some(rmp_serde::from_slice(data.value())?),
                    None => None,
                };
                v
            };

            if let Some(session) = session {
                {
                    let mut table = write_txn.open_table(SESSIONS)?;
                    table.remove(session_id.as_str())?;
                }
                remove_from_user_index(&write_txn, &session.user_id, session_id)?;
            }

            {
                let mut expiry_table = write_txn.open_table(SESSION_EXPIRY)?;
                expiry_table.remove(expiry_key_val.as_str())?;
            }
        }

        write_txn.commit()?;
        Ok(expired.len())
    }

    /// Get all sessions owned by a user
    pub fn get_sessions_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<SessionRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let index_table = read_txn.open_table(USER_SESSIONS)?;
        let sessions_table = read_txn.open_table(SESSIONS)?;

        let session_ids: Vec<String> = match index_table.get(user_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut sessions = Vec::new();
        for session_id in session_ids {
            if let Some(data) = sessions_table.get(session_id.as_str())? {
                let session: SessionRecord = rmp_serde::from_slice(data.value())?;
                sessions.push(session);
            }
        }

        Ok(sessions)
    }
}

/// Prune one session id out of a user's index entry, dropping the entry
/// entirely when it empties.
fn remove_from_user_index(
    write_txn: &redb::WriteTransaction,
    user_id: &str,
    session_id: &str,
) -> Result<(), DatabaseError> {
    let session_ids: Option<Vec<String>> = {
        let index_table = write_txn.open_table(USER_SESSIONS)?;
        let v = match index_table.get(user_id)? {
            Some(data) => Some(rmp_serde::from_slice(data.value())?),
            None => None,
        };
        v
    };

    if let Some(mut ids) = session_ids {
        ids.retain(|id| id != session_id);
        let mut index_table = write_txn.open_table(USER_SESSIONS)?;
        if ids.is_empty() {
            index_table.remove(user_id)?;
        } else {
            let index_data = rmp_serde::to_vec_named(&ids)?;
            index_table.insert(user_id, index_data.as_slice())?;
        }
    }

    Ok(())
}
