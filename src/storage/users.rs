use redb::ReadableTable;

use super::db::{Database, DatabaseError};
use super::models::UserRecord;
use super::tables::*;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Store a user record and maintain the username/email unique indexes.
    ///
    /// Callers are expected to check availability first; a write with a taken
    /// username or email overwrites the index entry (single-process store,
    /// the API layer is the gatekeeper).
    pub fn put_user(&self, user: &UserRecord) -> Result<(), DatabaseError> {
        debug_assert!(!user.id.is_empty(), "user id must not be empty");
        debug_assert!(!user.username.is_empty(), "username must not be empty");

        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS)?;
            let data = rmp_serde::to_vec_named(user)?;
            table.insert(user.id.as_str(), data.as_slice())?;

            let mut username_table = write_txn.open_table(USERNAMES)?;
            let username_key = user.username.to_lowercase();
            username_table.insert(username_key.as_str(), user.id.as_str())?;

            let mut email_table = write_txn.open_table(EMAILS)?;
            let email_key = user.email.to_lowercase();
            email_table.insert(email_key.as_str(), user.id.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Get a user by id
    pub fn get_user(&self, user_id: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(user_id)? {
            Some(data) => {
                let user: UserRecord = rmp_serde::from_slice(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Look up a user by username (case-insensitive)
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let user_id: Option<String> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(USERNAMES)?;
            let key = username.to_lowercase();
            table.get(key.as_str())?.map(|v| v.value().to_string())
        };

        match user_id {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    /// Look up a user by email (case-insensitive)
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, DatabaseError> {
        let user_id: Option<String> = {
            let read_txn = self.begin_read()?;
            let table = read_txn.open_table(EMAILS)?;
            let key = email.to_lowercase();
            table.get(key.as_str())?.map(|v| v.value().to_string())
        };

        match user_id {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }
}
