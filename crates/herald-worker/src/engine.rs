use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, warn};

use herald_core::backoff::{lock_retry_delay, message_retry_delay};
use herald_core::config::BroadcastConfig;
use herald_lock::LeaseBackend;
use herald_store::{
    AudienceType, Campaign, CampaignStatus, CampaignStore, ClaimedMessage, StoreError,
    CLAIM_LEASE_SECS,
};
use herald_telegram::{classify, BroadcastContent, BroadcastTransport, SendVerdict};

use crate::error::Result;
use crate::metrics::WorkerMetrics;
use crate::rate::RateGate;

/// Queued campaigns examined per tick.
const LIFT_LIMIT: u32 = 20;
/// Running campaigns dispatched / drain-checked per tick.
const ACTIVE_CAMPAIGN_LIMIT: u32 = 50;
/// While another replica holds the lock, log the wait at most this often.
const LOCK_WAIT_LOG_EVERY: Duration = Duration::from_secs(30);

/// The broadcast scheduler loop.
///
/// Constructed by injecting the store, lease backend, transport, and
/// config — there is no global state, and both external seams are traits
/// so tests can script them.
pub struct BroadcastWorker {
    store: CampaignStore,
    lease: Arc<dyn LeaseBackend>,
    transport: Arc<dyn BroadcastTransport>,
    config: BroadcastConfig,
    metrics: Arc<WorkerMetrics>,
}

impl BroadcastWorker {
    pub fn new(
        store: CampaignStore,
        lease: Arc<dyn LeaseBackend>,
        transport: Arc<dyn BroadcastTransport>,
        config: BroadcastConfig,
        metrics: Arc<WorkerMetrics>,
    ) -> Self {
        Self {
            store,
            lease,
            transport,
            config,
            metrics,
        }
    }

    /// Main loop. Holds the distributed lock while ticking; on a lost
    /// refresh it stops mutating immediately and goes back to acquiring.
    /// Flipping `shutdown` to true ends the loop at the next suspension
    /// point and releases the lease.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("broadcast worker disabled by config");
            return;
        }

        let lock_ttl = Duration::from_secs(self.config.lock_ttl_sec.max(1));
        let tick_pause = Duration::from_secs(self.config.tick_seconds.max(1));
        let mut gate = RateGate::new(self.config.max_messages_per_second);

        let mut holding = false;
        let mut had_lock_before = false;
        let mut acquire_attempt: u32 = 0;
        let mut last_wait_log: Option<Instant> = None;

        info!("broadcast worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if !holding {
                acquire_attempt += 1;
                match self.lease.acquire(lock_ttl).await {
                    Ok(true) => {
                        if had_lock_before {
                            warn!("broadcast worker lock re-acquired");
                        } else {
                            info!("broadcast worker holds the lock");
                        }
                        holding = true;
                        had_lock_before = true;
                        acquire_attempt = 0;
                        last_wait_log = None;
                        self.metrics.set_has_lock(true);
                        self.metrics.note_refresh();
                        continue;
                    }
                    Ok(false) => {
                        if last_wait_log.map_or(true, |t| t.elapsed() >= LOCK_WAIT_LOG_EVERY) {
                            info!("broadcast worker waiting for lock");
                            last_wait_log = Some(Instant::now());
                        }
                    }
                    Err(e) => {
                        warn!("lease backend unavailable: {e}");
                    }
                }
                if sleep_or_shutdown(lock_retry_delay(acquire_attempt), &mut shutdown).await {
                    break;
                }
                continue;
            }

            // Extend the lease before touching any state.
            match self.lease.refresh(lock_ttl).await {
                Ok(true) => self.metrics.note_refresh(),
                Ok(false) => {
                    warn!("broadcast worker lock lost; re-entering acquire loop");
                    holding = false;
                    self.metrics.set_has_lock(false);
                    if sleep_or_shutdown(lock_retry_delay(1), &mut shutdown).await {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("lease refresh failed: {e}");
                    holding = false;
                    self.metrics.set_has_lock(false);
                    if sleep_or_shutdown(lock_retry_delay(1), &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick(&mut gate, &mut shutdown).await {
                // Store trouble: skip the rest of the tick, keep the lease,
                // and try again next round rather than committing partial work.
                error!("broadcast tick error: {e}");
            }

            if sleep_or_shutdown(tick_pause, &mut shutdown).await {
                break;
            }
        }

        if holding {
            if let Err(e) = self.lease.release().await {
                warn!("failed to release worker lease: {e}");
            }
        }
        self.metrics.set_has_lock(false);
        info!("broadcast worker stopped");
    }

    /// One scheduler round: lift, dispatch, complete, refresh gauges.
    /// Public so integration tests can drive rounds without the lock loop.
    pub async fn tick(
        &self,
        gate: &mut RateGate,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        self.lift_due_campaigns(Utc::now())?;
        self.dispatch_running(gate, shutdown).await?;
        self.complete_drained(Utc::now())?;

        self.metrics.set_queue_gauges(
            self.store.count_active_campaigns()?,
            self.store.count_pending_messages()?,
        );
        Ok(())
    }

    /// Phase 1: move due queued campaigns to running, materializing each
    /// outbox exactly once. Misconfigured campaigns fail here, before any
    /// row exists.
    fn lift_due_campaigns(&self, now: DateTime<Utc>) -> Result<()> {
        for campaign in self.store.list_due_queued(LIFT_LIMIT, now)? {
            if let Err(reason) = validate_for_lift(&campaign) {
                warn!(campaign_id = campaign.id, %reason, "campaign failed at lift");
                self.store.fail_campaign(campaign.id, &reason, now)?;
                continue;
            }
            self.store.lift_campaign(campaign.id, now)?;
        }
        Ok(())
    }

    /// Phase 2: claim and send one batch per running campaign.
    async fn dispatch_running(
        &self,
        gate: &mut RateGate,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        for campaign_id in self.store.list_running_ids(ACTIVE_CAMPAIGN_LIMIT)? {
            if *shutdown.borrow() {
                return Ok(());
            }
            let campaign = match self.store.get_campaign(campaign_id) {
                Ok(c) => c,
                Err(StoreError::CampaignNotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            // pause/cancel may have landed since the id listing.
            if campaign.status != CampaignStatus::Running {
                continue;
            }

            let batch = self.store.claim_batch(
                campaign.id,
                self.config.batch_size,
                Duration::from_secs(CLAIM_LEASE_SECS as u64),
                Utc::now(),
            )?;
            if batch.is_empty() {
                continue;
            }

            let content = content_for(&campaign);
            for message in batch {
                if *shutdown.borrow() {
                    // In-flight rows stay `sending`; their lease expires and
                    // the next holder re-claims them.
                    return Ok(());
                }
                gate.pace().await;
                let outcome = self.transport.send(message.chat_id, &content).await;
                gate.mark();
                self.record_outcome(&campaign, message, outcome)?;
            }
        }
        Ok(())
    }

    /// Phase 3: close running campaigns with nothing left to deliver.
    fn complete_drained(&self, now: DateTime<Utc>) -> Result<()> {
        for campaign_id in self.store.list_running_ids(ACTIVE_CAMPAIGN_LIMIT)? {
            self.store.complete_if_drained(campaign_id, now)?;
        }
        Ok(())
    }

    fn record_outcome(
        &self,
        campaign: &Campaign,
        message: ClaimedMessage,
        outcome: std::result::Result<
            herald_telegram::ApiResponse,
            herald_telegram::TelegramError,
        >,
    ) -> Result<()> {
        let now = Utc::now();
        let verdict = match outcome {
            Ok(resp) => classify(&resp),
            // Network trouble is always worth another attempt.
            Err(e) => SendVerdict::Retry {
                after: None,
                reason: e.to_string(),
            },
        };

        match verdict {
            SendVerdict::Delivered => {
                self.store.mark_sent(message.message_id, campaign.id, now)?;
                self.metrics.record_sent(campaign.id);
            }
            SendVerdict::Retry { after, reason }
                if message.attempts < i64::from(self.config.max_attempts) =>
            {
                let delay = after
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| message_retry_delay(message.attempts as u32));
                self.store
                    .schedule_retry(message.message_id, &reason, delay, now)?;
                self.metrics.record_retry(campaign.id);
            }
            // Out of attempts: the retry verdict escalates to permanent.
            SendVerdict::Retry { reason, .. } | SendVerdict::Permanent { reason } => {
                self.store
                    .mark_failed(message.message_id, campaign.id, &reason)?;
                self.metrics.record_failed(campaign.id);
            }
        }
        Ok(())
    }
}

/// Reject campaigns the engine cannot honor before any outbox row is
/// written: unknown audience tags and reply markup that is not a JSON
/// object.
fn validate_for_lift(campaign: &Campaign) -> std::result::Result<(), String> {
    AudienceType::from_str(&campaign.audience_type)?;

    if let Some(raw) = campaign.reply_markup_json.as_deref() {
        if !raw.trim().is_empty() {
            match serde_json::from_str::<serde_json::Value>(raw) {
                Ok(v) if v.is_object() => {}
                _ => {
                    return Err(
                        "reply_markup_json must be a JSON object (as in the Bot API)".to_string()
                    )
                }
            }
        }
    }
    Ok(())
}

/// Render a campaign into transport content. Markup that fails to parse
/// here was caught at lift; a None keeps the send well-formed regardless.
fn content_for(campaign: &Campaign) -> BroadcastContent {
    let reply_markup = campaign
        .reply_markup_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
        .filter(|v| v.is_object());
    let photo = campaign
        .photo_file_id
        .clone()
        .or_else(|| campaign.photo_url.clone());

    BroadcastContent {
        text: campaign.text.clone(),
        parse_mode: campaign.parse_mode.clone(),
        disable_web_page_preview: campaign.disable_web_page_preview,
        reply_markup,
        photo,
    }
}

/// Sleep, but wake immediately on shutdown. Returns true when the loop
/// should exit.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
