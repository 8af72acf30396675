use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{
    AdminAction, Campaign, CampaignPatch, CampaignStatus, ClaimedMessage, MessageStatus,
    NewCampaign, OutboxMessage,
};

/// Row lease duration applied by `claim_batch`.
pub const CLAIM_LEASE_SECS: i64 = 120;

/// Upper bound on persisted error strings. Longer provider responses are
/// truncated, never rejected, so a verbose error can't wedge a row between
/// retry and persist-fail.
pub const MAX_ERROR_LEN: usize = 2000;

const CAMPAIGN_COLS: &str = "id, name, status, audience_type, audience_params_json, text, \
     parse_mode, disable_web_page_preview, reply_markup_json, photo_file_id, photo_url, \
     scheduled_at, created_at, outbox_created_at, started_at, finished_at, \
     total_recipients, sent_count, failed_count, last_error";

const MESSAGE_COLS: &str = "id, campaign_id, chat_id, status, attempts, next_retry_at, \
     locked_until, last_error, created_at, sent_at";

/// Statuses that keep a campaign from draining.
const OPEN_MESSAGE_STATUSES: &str = "('pending','retry','sending')";

fn truncate_error(error: &str) -> String {
    if error.chars().count() <= MAX_ERROR_LEN {
        error.to_string()
    } else {
        error.chars().take(MAX_ERROR_LEN).collect()
    }
}

fn parse_col<T: FromStr>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                e.to_string(),
            )),
        )
    })
}

fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        status: parse_col(2, row.get::<_, String>(2)?)?,
        audience_type: row.get(3)?,
        audience_params_json: row.get(4)?,
        text: row.get(5)?,
        parse_mode: row.get(6)?,
        disable_web_page_preview: row.get::<_, i64>(7)? != 0,
        reply_markup_json: row.get(8)?,
        photo_file_id: row.get(9)?,
        photo_url: row.get(10)?,
        scheduled_at: row.get(11)?,
        created_at: row.get(12)?,
        outbox_created_at: row.get(13)?,
        started_at: row.get(14)?,
        finished_at: row.get(15)?,
        total_recipients: row.get(16)?,
        sent_count: row.get(17)?,
        failed_count: row.get(18)?,
        last_error: row.get(19)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<OutboxMessage> {
    Ok(OutboxMessage {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        chat_id: row.get(2)?,
        status: parse_col(3, row.get::<_, String>(3)?)?,
        attempts: row.get(4)?,
        next_retry_at: row.get(5)?,
        locked_until: row.get(6)?,
        last_error: row.get(7)?,
        created_at: row.get(8)?,
        sent_at: row.get(9)?,
    })
}

/// Reply markup must look like a Telegram `reply_markup` value: a JSON
/// object. Anything else is rejected before it can poison a campaign.
fn validate_reply_markup(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| StoreError::Validation(format!("reply_markup_json is not valid JSON: {e}")))?;
    if !value.is_object() {
        return Err(StoreError::Validation(
            "reply_markup_json must be a JSON object (as in the Bot API)".to_string(),
        ));
    }
    Ok(())
}

/// Normalize an optional markup string: blank collapses to None, anything
/// else must validate.
fn normalize_reply_markup(raw: Option<&str>) -> Result<Option<String>> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => {
            validate_reply_markup(s)?;
            Ok(Some(s.to_string()))
        }
    }
}

/// Transactional repository for campaigns and their outbox rows.
///
/// Shares the workspace SQLite connection; every operation that must be
/// atomic (claims, count bumps, the drain check) runs inside a single
/// transaction or conditional UPDATE so a racing tick during lock handover
/// cannot double-apply it.
#[derive(Clone)]
pub struct CampaignStore {
    conn: Arc<Mutex<Connection>>,
}

impl CampaignStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Result<Self> {
        {
            let conn = conn.lock().unwrap();
            conn.pragma_update(None, "foreign_keys", "ON")?;
            init_db(&conn)?;
        }
        Ok(Self { conn })
    }

    /// Cheap connectivity probe for the readiness endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    // --- authoring ---------------------------------------------------------

    pub fn create_campaign(&self, new: &NewCampaign, now: DateTime<Utc>) -> Result<Campaign> {
        if new.name.is_empty() || new.name.chars().count() > 120 {
            return Err(StoreError::Validation(
                "name must be 1..120 characters".to_string(),
            ));
        }
        if new.text.is_empty() {
            return Err(StoreError::Validation("text must not be empty".to_string()));
        }
        if !matches!(new.status, CampaignStatus::Draft | CampaignStatus::Queued) {
            return Err(StoreError::Validation(format!(
                "a campaign cannot be created as {}",
                new.status
            )));
        }
        let reply_markup = normalize_reply_markup(new.reply_markup_json.as_deref())?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO broadcast_campaigns
             (name, status, audience_type, audience_params_json, text, parse_mode,
              disable_web_page_preview, reply_markup_json, photo_file_id, photo_url,
              scheduled_at, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            rusqlite::params![
                new.name,
                new.status.to_string(),
                new.audience_type.to_string(),
                new.audience_params_json,
                new.text,
                new.parse_mode,
                new.disable_web_page_preview as i64,
                reply_markup,
                new.photo_file_id,
                new.photo_url,
                new.scheduled_at.map(|t| t.to_rfc3339()),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(campaign_id = id, name = %new.name, "campaign created");
        Self::get_on(&conn, id)
    }

    pub fn get_campaign(&self, id: i64) -> Result<Campaign> {
        let conn = self.conn.lock().unwrap();
        Self::get_on(&conn, id)
    }

    fn get_on(conn: &Connection, id: i64) -> Result<Campaign> {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CAMPAIGN_COLS} FROM broadcast_campaigns WHERE id = ?1"
        ))?;
        let mut rows = stmt.query_map([id], row_to_campaign)?;
        match rows.next() {
            Some(row) => Ok(row?),
            None => Err(StoreError::CampaignNotFound { id }),
        }
    }

    /// Newest first, for the admin listing.
    pub fn list_campaigns(&self, limit: u32) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CAMPAIGN_COLS} FROM broadcast_campaigns ORDER BY id DESC LIMIT ?1"
        ))?;
        let items = stmt
            .query_map([limit], row_to_campaign)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    pub fn list_messages(&self, campaign_id: i64, limit: u32) -> Result<Vec<OutboxMessage>> {
        let conn = self.conn.lock().unwrap();
        Self::get_on(&conn, campaign_id)?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLS} FROM broadcast_messages
             WHERE campaign_id = ?1 ORDER BY id ASC LIMIT ?2"
        ))?;
        let items = stmt
            .query_map(rusqlite::params![campaign_id, limit], row_to_message)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Apply a partial edit, honoring the per-status rules: draft and
    /// queued accept everything, paused accepts content fields only,
    /// running and terminal campaigns accept nothing.
    pub fn update_campaign(&self, id: i64, patch: &CampaignPatch) -> Result<Campaign> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_on(&conn, id)?;

        if patch.is_empty() {
            return Ok(current);
        }
        match current.status {
            CampaignStatus::Draft | CampaignStatus::Queued => {}
            CampaignStatus::Paused => {
                if patch.touches_non_content() {
                    return Err(StoreError::Conflict(format!(
                        "only content fields may change while {}",
                        current.status
                    )));
                }
            }
            status => {
                return Err(StoreError::Conflict(format!(
                    "campaign in status {status} cannot be edited"
                )));
            }
        }

        if let Some(ref name) = patch.name {
            if name.is_empty() || name.chars().count() > 120 {
                return Err(StoreError::Validation(
                    "name must be 1..120 characters".to_string(),
                ));
            }
        }
        if let Some(ref text) = patch.text {
            if text.is_empty() {
                return Err(StoreError::Validation("text must not be empty".to_string()));
            }
        }

        fn push(
            sets: &mut Vec<String>,
            params: &mut Vec<rusqlite::types::Value>,
            col: &str,
            value: rusqlite::types::Value,
        ) {
            params.push(value);
            sets.push(format!("{col} = ?{}", params.len()));
        }

        let mut sets: Vec<String> = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(ref v) = patch.name {
            push(&mut sets, &mut params, "name", v.clone().into());
        }
        if let Some(ref v) = patch.text {
            push(&mut sets, &mut params, "text", v.clone().into());
        }
        if let Some(ref v) = patch.parse_mode {
            push(&mut sets, &mut params, "parse_mode", v.clone().into());
        }
        if let Some(v) = patch.disable_web_page_preview {
            push(
                &mut sets,
                &mut params,
                "disable_web_page_preview",
                (v as i64).into(),
            );
        }
        if let Some(ref v) = patch.reply_markup_json {
            let normalized = normalize_reply_markup(Some(v.as_str()))?;
            push(
                &mut sets,
                &mut params,
                "reply_markup_json",
                match normalized {
                    Some(s) => s.into(),
                    None => rusqlite::types::Value::Null,
                },
            );
        }
        if let Some(ref v) = patch.photo_file_id {
            push(&mut sets, &mut params, "photo_file_id", v.clone().into());
        }
        if let Some(ref v) = patch.photo_url {
            push(&mut sets, &mut params, "photo_url", v.clone().into());
        }
        if let Some(v) = patch.scheduled_at {
            push(
                &mut sets,
                &mut params,
                "scheduled_at",
                v.to_rfc3339().into(),
            );
        }

        params.push(id.into());
        let sql = format!(
            "UPDATE broadcast_campaigns SET {} WHERE id = ?{}",
            sets.join(", "),
            params.len()
        );
        conn.execute(&sql, rusqlite::params_from_iter(params))?;
        debug!(campaign_id = id, "campaign updated");
        Self::get_on(&conn, id)
    }

    // --- lifecycle ---------------------------------------------------------

    /// Apply one named operator transition. The UPDATE is guarded on the
    /// expected current status, so two racing admins cannot both win the
    /// same edge.
    pub fn transition(&self, id: i64, action: AdminAction, now: DateTime<Utc>) -> Result<Campaign> {
        let conn = self.conn.lock().unwrap();
        let current = Self::get_on(&conn, id)?;
        let now_str = now.to_rfc3339();

        let changed = match (current.status, action) {
            (CampaignStatus::Draft, AdminAction::Queue) => conn.execute(
                "UPDATE broadcast_campaigns SET status = 'queued'
                 WHERE id = ?1 AND status = 'draft'",
                [id],
            )?,
            (CampaignStatus::Queued | CampaignStatus::Running, AdminAction::Pause) => conn
                .execute(
                    "UPDATE broadcast_campaigns SET status = 'paused'
                     WHERE id = ?1 AND status IN ('queued','running')",
                    [id],
                )?,
            (CampaignStatus::Paused, AdminAction::Resume) => {
                // A campaign paused before its lift has no outbox yet; send
                // it back through the queued path so materialization and
                // total_recipients happen exactly once.
                let target = if current.outbox_created_at.is_none() {
                    "queued"
                } else {
                    "running"
                };
                conn.execute(
                    "UPDATE broadcast_campaigns SET status = ?1
                     WHERE id = ?2 AND status = 'paused'",
                    rusqlite::params![target, id],
                )?
            }
            (status, AdminAction::Cancel) if !status.is_terminal() => conn.execute(
                "UPDATE broadcast_campaigns SET status = 'cancelled', finished_at = ?1
                 WHERE id = ?2 AND status IN ('draft','queued','running','paused')",
                rusqlite::params![now_str, id],
            )?,
            // Cancel is idempotent on terminal campaigns.
            (_, AdminAction::Cancel) => {
                return Ok(current);
            }
            (status, action) => {
                return Err(StoreError::Conflict(format!(
                    "{action} is not allowed from status {status}"
                )));
            }
        };

        if changed == 0 {
            // Lost a race: someone moved the campaign between our read and
            // the guarded write.
            let fresh = Self::get_on(&conn, id)?;
            return Err(StoreError::Conflict(format!(
                "{action} is not allowed from status {}",
                fresh.status
            )));
        }
        info!(campaign_id = id, %action, "campaign transition applied");
        Self::get_on(&conn, id)
    }

    // --- lift (worker) -----------------------------------------------------

    /// Queued campaigns whose schedule has arrived, oldest first.
    pub fn list_due_queued(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {CAMPAIGN_COLS} FROM broadcast_campaigns
             WHERE status = 'queued'
               AND (scheduled_at IS NULL OR scheduled_at <= ?1)
             ORDER BY id ASC LIMIT ?2"
        ))?;
        let items = stmt
            .query_map(
                rusqlite::params![now.to_rfc3339(), limit],
                row_to_campaign,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(items)
    }

    /// Mark a queued campaign as failed misconfiguration. Used by the lift
    /// phase when audience or markup cannot be honored.
    pub fn fail_campaign(&self, id: i64, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE broadcast_campaigns
             SET status = 'failed', last_error = ?1, finished_at = ?2
             WHERE id = ?3 AND status = 'queued'",
            rusqlite::params![truncate_error(reason), now.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Insert one pending outbox row per known user. Conflict-ignore on
    /// `(campaign_id, chat_id)` makes re-materialization a no-op.
    pub fn build_outbox_all_users(&self, campaign_id: i64, now: DateTime<Utc>) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        Self::insert_outbox_rows(&conn, campaign_id, &now.to_rfc3339())
    }

    fn insert_outbox_rows(conn: &Connection, campaign_id: i64, now_str: &str) -> Result<u64> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO broadcast_messages
                 (campaign_id, chat_id, status, attempts, created_at)
             SELECT ?1, chat_id, 'pending', 0, ?2 FROM bot_users",
            rusqlite::params![campaign_id, now_str],
        )?;
        Ok(inserted as u64)
    }

    /// Take a validated queued campaign to `running`: materialize the
    /// outbox exactly once, record the recipient count, stamp
    /// `started_at`. Everything happens in one transaction so a crash
    /// between outbox build and the status flip replays cleanly.
    pub fn lift_campaign(&self, id: i64, now: DateTime<Utc>) -> Result<Campaign> {
        let mut conn = self.conn.lock().unwrap();
        let now_str = now.to_rfc3339();
        let tx = conn.transaction()?;
        {
            let current = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT {CAMPAIGN_COLS} FROM broadcast_campaigns WHERE id = ?1"
                ))?;
                let mut rows = stmt.query_map([id], row_to_campaign)?;
                match rows.next() {
                    Some(row) => row?,
                    None => return Err(StoreError::CampaignNotFound { id }),
                }
            };
            if current.status != CampaignStatus::Queued {
                // Another loop won the lift during lock handover.
                return Ok(current);
            }
            if current.outbox_created_at.is_none() {
                Self::insert_outbox_rows(&tx, id, &now_str)?;
                tx.execute(
                    "UPDATE broadcast_campaigns SET outbox_created_at = ?1 WHERE id = ?2",
                    rusqlite::params![now_str, id],
                )?;
            }
            let total: i64 = tx.query_row(
                "SELECT COUNT(*) FROM broadcast_messages WHERE campaign_id = ?1",
                [id],
                |row| row.get(0),
            )?;
            tx.execute(
                "UPDATE broadcast_campaigns
                 SET total_recipients = ?1,
                     status = 'running',
                     started_at = COALESCE(started_at, ?2)
                 WHERE id = ?3",
                rusqlite::params![total, now_str, id],
            )?;
        }
        tx.commit()?;
        let campaign = Self::get_on(&conn, id)?;
        info!(
            campaign_id = id,
            recipients = campaign.total_recipients,
            "campaign lifted"
        );
        Ok(campaign)
    }

    // --- dispatch (worker) -------------------------------------------------

    pub fn list_running_ids(&self, limit: u32) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM broadcast_campaigns WHERE status = 'running'
             ORDER BY id ASC LIMIT ?1",
        )?;
        let ids = stmt
            .query_map([limit], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Atomically take up to `batch_size` eligible rows into `sending`.
    ///
    /// Eligible: open status, row lease absent or expired, retry gate
    /// absent or due. Expired `sending` rows are deliberately included —
    /// that is the crash-recovery path for a worker that died mid-batch.
    pub fn claim_batch(
        &self,
        campaign_id: i64,
        batch_size: u32,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClaimedMessage>> {
        let mut conn = self.conn.lock().unwrap();
        let now_str = now.to_rfc3339();
        let locked_until = (now + chrono::Duration::from_std(lease).unwrap_or_default()).to_rfc3339();

        let tx = conn.transaction()?;
        let claimed = {
            let eligible: Vec<(i64, i64, i64)> = {
                let mut stmt = tx.prepare_cached(&format!(
                    "SELECT id, chat_id, attempts FROM broadcast_messages
                     WHERE campaign_id = ?1
                       AND status IN {OPEN_MESSAGE_STATUSES}
                       AND (locked_until IS NULL OR locked_until <= ?2)
                       AND (next_retry_at IS NULL OR next_retry_at <= ?2)
                     ORDER BY id ASC LIMIT ?3"
                ))?;
                let rows = stmt.query_map(
                    rusqlite::params![campaign_id, now_str, batch_size],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };

            let mut claimed = Vec::with_capacity(eligible.len());
            for (message_id, chat_id, attempts) in eligible {
                tx.execute(
                    "UPDATE broadcast_messages
                     SET status = 'sending', attempts = attempts + 1,
                         locked_until = ?1, next_retry_at = NULL, last_error = NULL
                     WHERE id = ?2",
                    rusqlite::params![locked_until, message_id],
                )?;
                claimed.push(ClaimedMessage {
                    message_id,
                    chat_id,
                    attempts: attempts + 1,
                });
            }
            claimed
        };
        tx.commit()?;
        if !claimed.is_empty() {
            debug!(campaign_id, count = claimed.len(), "claimed outbox batch");
        }
        Ok(claimed)
    }

    /// Record a delivery: row goes terminal-`sent`, campaign `sent_count`
    /// bumps, both in one transaction. Re-marking an already sent row is a
    /// no-op, which keeps the counter exact across crash-recovery replays.
    pub fn mark_sent(&self, message_id: i64, campaign_id: i64, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE broadcast_messages
             SET status = 'sent', sent_at = ?1, next_retry_at = NULL, locked_until = NULL
             WHERE id = ?2 AND status != 'sent'",
            rusqlite::params![now.to_rfc3339(), message_id],
        )?;
        if changed > 0 {
            tx.execute(
                "UPDATE broadcast_campaigns SET sent_count = sent_count + 1 WHERE id = ?1",
                [campaign_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Record a permanent failure for one row; the campaign keeps going.
    pub fn mark_failed(&self, message_id: i64, campaign_id: i64, error: &str) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE broadcast_messages
             SET status = 'failed', last_error = ?1, next_retry_at = NULL, locked_until = NULL
             WHERE id = ?2 AND status NOT IN ('sent','failed')",
            rusqlite::params![truncate_error(error), message_id],
        )?;
        if changed > 0 {
            tx.execute(
                "UPDATE broadcast_campaigns SET failed_count = failed_count + 1 WHERE id = ?1",
                [campaign_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Put a row back in the queue after a transient failure.
    pub fn schedule_retry(
        &self,
        message_id: i64,
        error: &str,
        delay: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let next_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        conn.execute(
            "UPDATE broadcast_messages
             SET status = 'retry', next_retry_at = ?1, locked_until = NULL, last_error = ?2
             WHERE id = ?3",
            rusqlite::params![next_at.to_rfc3339(), truncate_error(error), message_id],
        )?;
        Ok(())
    }

    /// Close a running campaign once no open rows remain. A single
    /// conditional UPDATE, so two racing loops cannot both complete it.
    pub fn complete_if_drained(&self, campaign_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!(
                "UPDATE broadcast_campaigns
                 SET status = 'completed', finished_at = ?1
                 WHERE id = ?2 AND status = 'running'
                   AND NOT EXISTS (
                       SELECT 1 FROM broadcast_messages
                       WHERE campaign_id = ?2 AND status IN {OPEN_MESSAGE_STATUSES})"
            ),
            rusqlite::params![now.to_rfc3339(), campaign_id],
        )?;
        if changed > 0 {
            info!(campaign_id, "campaign completed");
        }
        Ok(changed > 0)
    }

    // --- metrics -----------------------------------------------------------

    pub fn count_active_campaigns(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM broadcast_campaigns WHERE status = 'running'",
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn count_pending_messages(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM broadcast_messages WHERE status IN {OPEN_MESSAGE_STATUSES}"
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    /// Live per-status row count, used by tests and the drain invariant.
    pub fn count_messages_by_status(
        &self,
        campaign_id: i64,
        status: MessageStatus,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM broadcast_messages WHERE campaign_id = ?1 AND status = ?2",
            rusqlite::params![campaign_id, status.to_string()],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AudienceType;

    fn open_store_with_users(chat_ids: &[i64]) -> CampaignStore {
        let conn = Connection::open_in_memory().unwrap();
        herald_users::db::init_db(&conn).unwrap();
        let now = Utc::now().to_rfc3339();
        for id in chat_ids {
            conn.execute(
                "INSERT INTO bot_users (chat_id, username, first_seen_at, last_seen_at)
                 VALUES (?1, NULL, ?2, ?2)",
                rusqlite::params![id, now],
            )
            .unwrap();
        }
        CampaignStore::new(Arc::new(Mutex::new(conn))).unwrap()
    }

    fn queued_campaign(store: &CampaignStore) -> Campaign {
        let mut new = NewCampaign::text_only("launch", "hi");
        new.status = CampaignStatus::Queued;
        store.create_campaign(&new, Utc::now()).unwrap()
    }

    fn lifted_campaign(store: &CampaignStore) -> Campaign {
        let c = queued_campaign(store);
        store.lift_campaign(c.id, Utc::now()).unwrap()
    }

    #[test]
    fn create_applies_defaults_and_round_trips() {
        let store = open_store_with_users(&[]);
        let c = store
            .create_campaign(&NewCampaign::text_only("hello", "world"), Utc::now())
            .unwrap();
        assert_eq!(c.status, CampaignStatus::Draft);
        assert_eq!(c.audience_type, AudienceType::AllUsers.to_string());
        assert_eq!(c.parse_mode, "HTML");
        assert!(c.disable_web_page_preview);
        assert_eq!(c.sent_count, 0);
        assert_eq!(c.failed_count, 0);
        assert!(c.total_recipients.is_none());

        let fetched = store.get_campaign(c.id).unwrap();
        assert_eq!(fetched.name, "hello");
        assert_eq!(fetched.created_at, c.created_at);
    }

    #[test]
    fn create_rejects_bad_payloads() {
        let store = open_store_with_users(&[]);
        let cases = [
            NewCampaign::text_only("", "text"),
            NewCampaign::text_only("n".repeat(121), "text"),
            NewCampaign::text_only("name", ""),
        ];
        for new in cases {
            assert!(matches!(
                store.create_campaign(&new, Utc::now()),
                Err(StoreError::Validation(_))
            ));
        }

        let mut bad_markup = NewCampaign::text_only("name", "text");
        bad_markup.reply_markup_json = Some("[1,2,3]".to_string());
        assert!(matches!(
            store.create_campaign(&bad_markup, Utc::now()),
            Err(StoreError::Validation(_))
        ));

        let mut unparsable = NewCampaign::text_only("name", "text");
        unparsable.reply_markup_json = Some("{not json".to_string());
        assert!(matches!(
            store.create_campaign(&unparsable, Utc::now()),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn blank_reply_markup_collapses_to_null() {
        let store = open_store_with_users(&[]);
        let mut new = NewCampaign::text_only("name", "text");
        new.reply_markup_json = Some("   ".to_string());
        let c = store.create_campaign(&new, Utc::now()).unwrap();
        assert!(c.reply_markup_json.is_none());
    }

    #[test]
    fn unknown_campaign_is_not_found() {
        let store = open_store_with_users(&[]);
        assert!(matches!(
            store.get_campaign(9999),
            Err(StoreError::CampaignNotFound { id: 9999 })
        ));
        assert!(matches!(
            store.transition(9999, AdminAction::Queue, Utc::now()),
            Err(StoreError::CampaignNotFound { .. })
        ));
    }

    #[test]
    fn lifecycle_edges_queue_pause_resume_cancel() {
        let store = open_store_with_users(&[1]);
        let c = store
            .create_campaign(&NewCampaign::text_only("c", "t"), Utc::now())
            .unwrap();

        let c = store.transition(c.id, AdminAction::Queue, Utc::now()).unwrap();
        assert_eq!(c.status, CampaignStatus::Queued);

        // Queue again is a conflict.
        assert!(matches!(
            store.transition(c.id, AdminAction::Queue, Utc::now()),
            Err(StoreError::Conflict(_))
        ));

        let c = store.transition(c.id, AdminAction::Pause, Utc::now()).unwrap();
        assert_eq!(c.status, CampaignStatus::Paused);

        // Paused before lift: resume goes back to queued, not running.
        let c = store.transition(c.id, AdminAction::Resume, Utc::now()).unwrap();
        assert_eq!(c.status, CampaignStatus::Queued);

        let c = store.lift_campaign(c.id, Utc::now()).unwrap();
        assert_eq!(c.status, CampaignStatus::Running);

        let c = store.transition(c.id, AdminAction::Pause, Utc::now()).unwrap();
        let c = store.transition(c.id, AdminAction::Resume, Utc::now()).unwrap();
        assert_eq!(c.status, CampaignStatus::Running);

        let now = Utc::now();
        let c = store.transition(c.id, AdminAction::Cancel, now).unwrap();
        assert_eq!(c.status, CampaignStatus::Cancelled);
        assert_eq!(c.finished_at.as_deref(), Some(now.to_rfc3339().as_str()));

        // Cancel on a terminal campaign is an idempotent no-op.
        let again = store.transition(c.id, AdminAction::Cancel, Utc::now()).unwrap();
        assert_eq!(again.status, CampaignStatus::Cancelled);
        assert_eq!(again.finished_at, c.finished_at);

        // Resume from cancelled is a conflict.
        assert!(matches!(
            store.transition(c.id, AdminAction::Resume, Utc::now()),
            Err(StoreError::Conflict(_))
        ));
    }

    #[test]
    fn update_rules_follow_status() {
        let store = open_store_with_users(&[1]);
        let c = store
            .create_campaign(&NewCampaign::text_only("c", "t"), Utc::now())
            .unwrap();

        // Draft: everything editable.
        let patch = CampaignPatch {
            name: Some("renamed".into()),
            scheduled_at: Some(Utc::now()),
            ..Default::default()
        };
        let c = store.update_campaign(c.id, &patch).unwrap();
        assert_eq!(c.name, "renamed");
        assert!(c.scheduled_at.is_some());

        let c = store.transition(c.id, AdminAction::Queue, Utc::now()).unwrap();
        let c = store.lift_campaign(c.id, Utc::now()).unwrap();
        let c = store.transition(c.id, AdminAction::Pause, Utc::now()).unwrap();

        // Paused: content edits fine, name/schedule conflict.
        let content = CampaignPatch {
            text: Some("new text".into()),
            ..Default::default()
        };
        let updated = store.update_campaign(c.id, &content).unwrap();
        assert_eq!(updated.text, "new text");

        let non_content = CampaignPatch {
            name: Some("nope".into()),
            ..Default::default()
        };
        assert!(matches!(
            store.update_campaign(c.id, &non_content),
            Err(StoreError::Conflict(_))
        ));

        // Running: nothing editable.
        let c = store.transition(c.id, AdminAction::Resume, Utc::now()).unwrap();
        assert!(matches!(
            store.update_campaign(c.id, &content),
            Err(StoreError::Conflict(_))
        ));

        // Empty patch is always a no-op.
        let same = store.update_campaign(c.id, &CampaignPatch::default()).unwrap();
        assert_eq!(same.text, "new text");
    }

    #[test]
    fn outbox_build_is_idempotent() {
        let store = open_store_with_users(&[1, 2, 3]);
        let c = queued_campaign(&store);

        assert_eq!(store.build_outbox_all_users(c.id, Utc::now()).unwrap(), 3);
        // Re-materialization inserts nothing.
        assert_eq!(store.build_outbox_all_users(c.id, Utc::now()).unwrap(), 0);

        let messages = store.list_messages(c.id, 100).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.status == MessageStatus::Pending));
    }

    #[test]
    fn lift_sets_counters_and_is_replay_safe() {
        let store = open_store_with_users(&[1, 2, 3]);
        let c = queued_campaign(&store);

        let now = Utc::now();
        let lifted = store.lift_campaign(c.id, now).unwrap();
        assert_eq!(lifted.status, CampaignStatus::Running);
        assert_eq!(lifted.total_recipients, Some(3));
        assert!(lifted.outbox_created_at.is_some());
        assert!(lifted.started_at.is_some());

        // Lifting again (crash between build and flip replays as queued →
        // simulate by forcing status back) leaves the row set unchanged.
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE broadcast_campaigns SET status = 'queued' WHERE id = ?1",
                [c.id],
            )
            .unwrap();
        }
        let again = store.lift_campaign(c.id, Utc::now()).unwrap();
        assert_eq!(again.total_recipients, Some(3));
        assert_eq!(store.list_messages(c.id, 100).unwrap().len(), 3);
        // First materialization timestamp is preserved.
        assert_eq!(again.outbox_created_at, lifted.outbox_created_at);
    }

    #[test]
    fn lift_of_non_queued_campaign_is_a_no_op() {
        let store = open_store_with_users(&[1]);
        let c = lifted_campaign(&store);
        let c2 = store.lift_campaign(c.id, Utc::now()).unwrap();
        assert_eq!(c2.status, CampaignStatus::Running);
        assert_eq!(c2.started_at, c.started_at);
    }

    #[test]
    fn claim_batch_claims_in_id_order_and_bumps_attempts() {
        let store = open_store_with_users(&[10, 20, 30]);
        let c = lifted_campaign(&store);

        let now = Utc::now();
        let claimed = store
            .claim_batch(c.id, 2, Duration::from_secs(120), now)
            .unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].chat_id, 10);
        assert_eq!(claimed[1].chat_id, 20);
        assert!(claimed.iter().all(|m| m.attempts == 1));

        // The two claimed rows are leased; only the third is left.
        let rest = store
            .claim_batch(c.id, 10, Duration::from_secs(120), now)
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].chat_id, 30);

        // Nothing eligible now.
        assert!(store
            .claim_batch(c.id, 10, Duration::from_secs(120), now)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn expired_lease_is_reclaimable() {
        let store = open_store_with_users(&[30]);
        let c = lifted_campaign(&store);

        let t0 = Utc::now();
        let claimed = store
            .claim_batch(c.id, 1, Duration::from_secs(120), t0)
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);

        // Still leased at t0 + 60 s.
        let t1 = t0 + chrono::Duration::seconds(60);
        assert!(store
            .claim_batch(c.id, 1, Duration::from_secs(120), t1)
            .unwrap()
            .is_empty());

        // Worker died; lease ran out. Row comes back with attempts = 2.
        let t2 = t0 + chrono::Duration::seconds(120);
        let reclaimed = store
            .claim_batch(c.id, 1, Duration::from_secs(120), t2)
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
        assert_eq!(reclaimed[0].message_id, claimed[0].message_id);
    }

    #[test]
    fn retry_gate_holds_until_due() {
        let store = open_store_with_users(&[10]);
        let c = lifted_campaign(&store);
        let t0 = Utc::now();
        let m = store
            .claim_batch(c.id, 1, Duration::from_secs(120), t0)
            .unwrap()[0];

        store
            .schedule_retry(m.message_id, "Too Many Requests", Duration::from_secs(5), t0)
            .unwrap();

        let row = &store.list_messages(c.id, 10).unwrap()[0];
        assert_eq!(row.status, MessageStatus::Retry);
        assert!(row.locked_until.is_none());
        assert_eq!(row.last_error.as_deref(), Some("Too Many Requests"));

        // Not before T.
        let t1 = t0 + chrono::Duration::seconds(4);
        assert!(store
            .claim_batch(c.id, 1, Duration::from_secs(120), t1)
            .unwrap()
            .is_empty());

        // Claimable at T; claim clears the retry bookkeeping.
        let t2 = t0 + chrono::Duration::seconds(5);
        let claimed = store
            .claim_batch(c.id, 1, Duration::from_secs(120), t2)
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);
        let row = &store.list_messages(c.id, 10).unwrap()[0];
        assert!(row.next_retry_at.is_none());
        assert!(row.last_error.is_none());
    }

    #[test]
    fn mark_sent_is_idempotent_for_the_counter() {
        let store = open_store_with_users(&[10]);
        let c = lifted_campaign(&store);
        let m = store
            .claim_batch(c.id, 1, Duration::from_secs(120), Utc::now())
            .unwrap()[0];

        let now = Utc::now();
        store.mark_sent(m.message_id, c.id, now).unwrap();
        store.mark_sent(m.message_id, c.id, now).unwrap();

        let c = store.get_campaign(c.id).unwrap();
        assert_eq!(c.sent_count, 1);
        let row = &store.list_messages(c.id, 10).unwrap()[0];
        assert_eq!(row.status, MessageStatus::Sent);
        assert!(row.sent_at.is_some());
        assert!(row.next_retry_at.is_none());
        assert!(row.locked_until.is_none());
    }

    #[test]
    fn mark_failed_counts_once_and_truncates() {
        let store = open_store_with_users(&[10]);
        let c = lifted_campaign(&store);
        let m = store
            .claim_batch(c.id, 1, Duration::from_secs(120), Utc::now())
            .unwrap()[0];

        let long_error = "x".repeat(3000);
        store.mark_failed(m.message_id, c.id, &long_error).unwrap();
        store.mark_failed(m.message_id, c.id, &long_error).unwrap();

        let c = store.get_campaign(c.id).unwrap();
        assert_eq!(c.failed_count, 1);
        let row = &store.list_messages(c.id, 10).unwrap()[0];
        assert_eq!(row.status, MessageStatus::Failed);
        assert_eq!(row.last_error.as_ref().unwrap().len(), MAX_ERROR_LEN);
    }

    #[test]
    fn complete_if_drained_requires_running_and_empty() {
        let store = open_store_with_users(&[1, 2]);
        let c = lifted_campaign(&store);

        // Two open rows: not drained.
        assert!(!store.complete_if_drained(c.id, Utc::now()).unwrap());

        let batch = store
            .claim_batch(c.id, 10, Duration::from_secs(120), Utc::now())
            .unwrap();
        store.mark_sent(batch[0].message_id, c.id, Utc::now()).unwrap();
        assert!(!store.complete_if_drained(c.id, Utc::now()).unwrap());

        store
            .mark_failed(batch[1].message_id, c.id, "blocked")
            .unwrap();
        let now = Utc::now();
        assert!(store.complete_if_drained(c.id, now).unwrap());

        let c = store.get_campaign(c.id).unwrap();
        assert_eq!(c.status, CampaignStatus::Completed);
        assert_eq!(c.finished_at.as_deref(), Some(now.to_rfc3339().as_str()));
        assert_eq!(c.sent_count + c.failed_count, c.total_recipients.unwrap());

        // Second call: campaign no longer running, returns false.
        assert!(!store.complete_if_drained(c.id, Utc::now()).unwrap());
    }

    #[test]
    fn scheduled_campaigns_are_not_due_early() {
        let store = open_store_with_users(&[1]);
        let mut new = NewCampaign::text_only("later", "hi");
        new.status = CampaignStatus::Queued;
        let t0 = Utc::now();
        new.scheduled_at = Some(t0 + chrono::Duration::seconds(3600));
        let c = store.create_campaign(&new, t0).unwrap();

        assert!(store.list_due_queued(20, t0).unwrap().is_empty());
        let due = store
            .list_due_queued(20, t0 + chrono::Duration::seconds(3600))
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, c.id);
    }

    #[test]
    fn fail_campaign_only_hits_queued() {
        let store = open_store_with_users(&[1]);
        let c = queued_campaign(&store);
        let now = Utc::now();
        store.fail_campaign(c.id, "unsupported audience_type: vip", now).unwrap();

        let c = store.get_campaign(c.id).unwrap();
        assert_eq!(c.status, CampaignStatus::Failed);
        assert_eq!(
            c.last_error.as_deref(),
            Some("unsupported audience_type: vip")
        );
        assert_eq!(c.finished_at.as_deref(), Some(now.to_rfc3339().as_str()));

        // Already failed: a second call changes nothing.
        store.fail_campaign(c.id, "other", Utc::now()).unwrap();
        let again = store.get_campaign(c.id).unwrap();
        assert_eq!(again.last_error, c.last_error);
    }

    #[test]
    fn metrics_counts_reflect_live_state() {
        let store = open_store_with_users(&[1, 2]);
        let c = lifted_campaign(&store);

        assert_eq!(store.count_active_campaigns().unwrap(), 1);
        assert_eq!(store.count_pending_messages().unwrap(), 2);

        let batch = store
            .claim_batch(c.id, 10, Duration::from_secs(120), Utc::now())
            .unwrap();
        // Claimed rows are still open (sending).
        assert_eq!(store.count_pending_messages().unwrap(), 2);

        for m in &batch {
            store.mark_sent(m.message_id, c.id, Utc::now()).unwrap();
        }
        store.complete_if_drained(c.id, Utc::now()).unwrap();
        assert_eq!(store.count_active_campaigns().unwrap(), 0);
        assert_eq!(store.count_pending_messages().unwrap(), 0);
    }

    #[test]
    fn list_campaigns_is_newest_first() {
        let store = open_store_with_users(&[]);
        for name in ["a", "b", "c"] {
            store
                .create_campaign(&NewCampaign::text_only(name, "t"), Utc::now())
                .unwrap();
        }
        let items = store.list_campaigns(2).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "c");
        assert_eq!(items[1].name, "b");
    }
}
