use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::db::init_db;
use crate::error::Result;
use crate::types::BotUser;

/// Thread-safe handle over the `bot_users` table.
///
/// Shares the workspace-wide SQLite file; the connection is wrapped in a
/// Mutex so the gateway handlers and the worker can hold clones.
#[derive(Clone)]
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
}

impl UserStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        init_db(&conn.lock().unwrap())?;
        Ok(Self { conn })
    }

    /// Record that the bot heard from `chat_id`. First contact inserts the
    /// row; later contacts only refresh `last_seen_at` and `username`.
    pub fn record_contact(
        &self,
        chat_id: i64,
        username: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now_str = now.to_rfc3339();
        let inserted = conn.execute(
            "INSERT INTO bot_users (chat_id, username, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(chat_id) DO UPDATE SET
                username = excluded.username,
                last_seen_at = excluded.last_seen_at",
            rusqlite::params![chat_id, username, now_str],
        )?;
        if inserted > 0 {
            debug!(chat_id, "user contact recorded");
        }
        Ok(())
    }

    pub fn get(&self, chat_id: i64) -> Result<Option<BotUser>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT chat_id, username, first_seen_at, last_seen_at
             FROM bot_users WHERE chat_id = ?1",
        )?;
        let user = stmt
            .query_map([chat_id], |row| {
                Ok(BotUser {
                    chat_id: row.get(0)?,
                    username: row.get(1)?,
                    first_seen_at: row.get(2)?,
                    last_seen_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .next();
        Ok(user)
    }

    /// Every known chat id, ascending. This is the `all_users` audience.
    pub fn list_chat_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT chat_id FROM bot_users ORDER BY chat_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM bot_users", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> UserStore {
        let conn = Connection::open_in_memory().unwrap();
        UserStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn first_contact_inserts_row() {
        let s = store();
        let now = Utc::now();
        s.record_contact(42, Some("alice"), now).unwrap();

        let user = s.get(42).unwrap().unwrap();
        assert_eq!(user.chat_id, 42);
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.first_seen_at, user.last_seen_at);
    }

    #[test]
    fn repeat_contact_keeps_first_seen() {
        let s = store();
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::seconds(90);
        s.record_contact(42, Some("alice"), t0).unwrap();
        s.record_contact(42, Some("alice_renamed"), t1).unwrap();

        let user = s.get(42).unwrap().unwrap();
        assert_eq!(user.first_seen_at, t0.to_rfc3339());
        assert_eq!(user.last_seen_at, t1.to_rfc3339());
        assert_eq!(user.username.as_deref(), Some("alice_renamed"));
        assert_eq!(s.count().unwrap(), 1);
    }

    #[test]
    fn list_chat_ids_is_ascending() {
        let s = store();
        let now = Utc::now();
        for id in [7, 3, 11] {
            s.record_contact(id, None, now).unwrap();
        }
        assert_eq!(s.list_chat_ids().unwrap(), vec![3, 7, 11]);
    }
}
