use rusqlite::Connection;

use crate::error::Result;

/// Initialise the users schema in `conn`. Idempotent — safe on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS bot_users (
            chat_id        INTEGER NOT NULL PRIMARY KEY,
            username       TEXT,
            first_seen_at  TEXT    NOT NULL,
            last_seen_at   TEXT    NOT NULL
        ) STRICT;
        ",
    )?;
    Ok(())
}
