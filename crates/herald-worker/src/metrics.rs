use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;

/// Per-campaign delivery counters.
#[derive(Default)]
pub struct CampaignCounters {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
    pub retries: AtomicU64,
}

/// Process-wide broadcast metrics, shared between the worker (writes) and
/// the health endpoint (reads). All plain atomics — no locks on the
/// dispatch path.
#[derive(Default)]
pub struct WorkerMetrics {
    sent_total: AtomicU64,
    failed_total: AtomicU64,
    retries_total: AtomicU64,
    per_campaign: DashMap<i64, CampaignCounters>,
    has_lock: AtomicBool,
    /// Unix seconds of the last successful lease acquire/refresh; 0 when
    /// the worker has never held the lease.
    last_refresh_unix: AtomicI64,
    active_campaigns: AtomicI64,
    pending_messages: AtomicI64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, campaign_id: i64) {
        self.sent_total.fetch_add(1, Ordering::Relaxed);
        self.per_campaign
            .entry(campaign_id)
            .or_default()
            .sent
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self, campaign_id: i64) {
        self.failed_total.fetch_add(1, Ordering::Relaxed);
        self.per_campaign
            .entry(campaign_id)
            .or_default()
            .failed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self, campaign_id: i64) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
        self.per_campaign
            .entry(campaign_id)
            .or_default()
            .retries
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_has_lock(&self, held: bool) {
        self.has_lock.store(held, Ordering::Relaxed);
    }

    /// Stamp a successful lease acquire or refresh.
    pub fn note_refresh(&self) {
        self.last_refresh_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    /// True when the worker refreshed its lease within `max_age`.
    pub fn lease_fresh(&self, max_age: Duration) -> bool {
        let last = self.last_refresh_unix.load(Ordering::Relaxed);
        if last == 0 {
            return false;
        }
        let age = Utc::now().timestamp().saturating_sub(last);
        age >= 0 && (age as u64) <= max_age.as_secs()
    }

    pub fn set_queue_gauges(&self, active_campaigns: i64, pending_messages: i64) {
        self.active_campaigns
            .store(active_campaigns, Ordering::Relaxed);
        self.pending_messages
            .store(pending_messages, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut campaigns: Vec<CampaignSnapshot> = self
            .per_campaign
            .iter()
            .map(|entry| CampaignSnapshot {
                campaign_id: *entry.key(),
                sent: entry.sent.load(Ordering::Relaxed),
                failed: entry.failed.load(Ordering::Relaxed),
                retries: entry.retries.load(Ordering::Relaxed),
            })
            .collect();
        campaigns.sort_by_key(|c| c.campaign_id);

        MetricsSnapshot {
            sent_total: self.sent_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            active_campaigns: self.active_campaigns.load(Ordering::Relaxed),
            pending_messages: self.pending_messages.load(Ordering::Relaxed),
            worker_has_lock: self.has_lock.load(Ordering::Relaxed),
            campaigns,
        }
    }
}

/// Point-in-time view rendered by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub sent_total: u64,
    pub failed_total: u64,
    pub retries_total: u64,
    pub active_campaigns: i64,
    pub pending_messages: i64,
    pub worker_has_lock: bool,
    pub campaigns: Vec<CampaignSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignSnapshot {
    pub campaign_id: i64,
    pub sent: u64,
    pub failed: u64,
    pub retries: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_globally_and_per_campaign() {
        let m = WorkerMetrics::new();
        m.record_sent(1);
        m.record_sent(1);
        m.record_sent(2);
        m.record_failed(2);
        m.record_retry(1);

        let snap = m.snapshot();
        assert_eq!(snap.sent_total, 3);
        assert_eq!(snap.failed_total, 1);
        assert_eq!(snap.retries_total, 1);
        assert_eq!(snap.campaigns.len(), 2);
        assert_eq!(snap.campaigns[0].campaign_id, 1);
        assert_eq!(snap.campaigns[0].sent, 2);
        assert_eq!(snap.campaigns[0].retries, 1);
        assert_eq!(snap.campaigns[1].sent, 1);
        assert_eq!(snap.campaigns[1].failed, 1);
    }

    #[test]
    fn lease_freshness_requires_a_refresh() {
        let m = WorkerMetrics::new();
        assert!(!m.lease_fresh(Duration::from_secs(120)));

        m.note_refresh();
        assert!(m.lease_fresh(Duration::from_secs(120)));
        assert!(m.lease_fresh(Duration::from_secs(0)));
    }
}
