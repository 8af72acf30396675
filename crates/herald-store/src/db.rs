use rusqlite::Connection;

use crate::error::Result;

/// Initialise the broadcast schema in `conn`.
///
/// Creates the campaign and outbox tables (idempotent) plus the indices
/// backing the two hot queries: the claim scan
/// (`status IN (…) AND locked_until/next_retry_at due, ORDER BY id`) and
/// the per-campaign completion check on `(campaign_id, status)`.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS broadcast_campaigns (
            id                        INTEGER PRIMARY KEY AUTOINCREMENT,
            name                      TEXT    NOT NULL,
            status                    TEXT    NOT NULL DEFAULT 'draft',
            audience_type             TEXT    NOT NULL DEFAULT 'all_users',
            audience_params_json      TEXT,
            text                      TEXT    NOT NULL,
            parse_mode                TEXT    NOT NULL DEFAULT 'HTML',
            disable_web_page_preview  INTEGER NOT NULL DEFAULT 1,
            reply_markup_json         TEXT,
            photo_file_id             TEXT,
            photo_url                 TEXT,
            scheduled_at              TEXT,               -- ISO-8601 or NULL
            created_at                TEXT    NOT NULL,
            outbox_created_at         TEXT,
            started_at                TEXT,
            finished_at               TEXT,
            total_recipients          INTEGER,
            sent_count                INTEGER NOT NULL DEFAULT 0,
            failed_count              INTEGER NOT NULL DEFAULT 0,
            last_error                TEXT
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_campaigns_status
            ON broadcast_campaigns (status);
        CREATE INDEX IF NOT EXISTS idx_campaigns_scheduled_at
            ON broadcast_campaigns (scheduled_at);

        CREATE TABLE IF NOT EXISTS broadcast_messages (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id    INTEGER NOT NULL
                           REFERENCES broadcast_campaigns(id) ON DELETE CASCADE,
            chat_id        INTEGER NOT NULL,
            status         TEXT    NOT NULL DEFAULT 'pending',
            attempts       INTEGER NOT NULL DEFAULT 0,
            next_retry_at  TEXT,
            locked_until   TEXT,
            last_error     TEXT,
            created_at     TEXT    NOT NULL,
            sent_at        TEXT,
            UNIQUE (campaign_id, chat_id)
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_messages_campaign_status
            ON broadcast_messages (campaign_id, status);
        CREATE INDEX IF NOT EXISTS idx_messages_claim
            ON broadcast_messages (campaign_id, status, next_retry_at, locked_until);
        ",
    )?;
    Ok(())
}
