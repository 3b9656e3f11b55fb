use chrono::Utc;
use clientmon_common::types::User;
use rusqlite::{params, OptionalExtension};

use super::{ts_from_db, ts_to_db, MonitorStore};
use crate::error::{Result, StorageError};

impl MonitorStore {
    pub fn insert_user(&self, username: &str, email: Option<&str>) -> Result<User> {
        let id = clientmon_common::id::next_id();
        {
            let conn = self.lock();
            conn.execute(
                "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, email, ts_to_db(Utc::now())],
            )?;
        }
        self.get_user(&id)?
            .ok_or(StorageError::InsertReadback { entity: "user" })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.lock();
        let user = conn
            .query_row(
                "SELECT id, username, email, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        email: row.get(2)?,
                        created_at: ts_from_db(row.get(3)?),
                    })
                },
            )
            .optional()?;
        Ok(user)
    }
}
