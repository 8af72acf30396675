use std::time::Duration;

use tokio::time::Instant;

/// Global send pacer: consecutive attempts are at least
/// `1 / max_messages_per_second` apart, across all campaigns.
///
/// `pace` sleeps off whatever remains of the interval; `mark` is called
/// once the provider call returns, so the spacing covers the whole
/// request rather than just its start.
pub struct RateGate {
    min_interval: Duration,
    last: Option<Instant>,
}

impl RateGate {
    pub fn new(max_per_second: u32) -> Self {
        let min_interval = if max_per_second == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / f64::from(max_per_second))
        };
        Self {
            min_interval,
            last: None,
        }
    }

    /// Wait until the next send is allowed.
    pub async fn pace(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
    }

    /// Record that a send attempt just finished.
    pub fn mark(&mut self) {
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_send_is_not_delayed() {
        let mut gate = RateGate::new(25);
        let before = Instant::now();
        gate.pace().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_sends_are_spaced() {
        let mut gate = RateGate::new(25); // 40 ms floor
        gate.pace().await;
        gate.mark();

        let before = Instant::now();
        gate.pace().await;
        let waited = Instant::now() - before;
        assert!(waited >= Duration::from_millis(40), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sends_need_no_extra_wait() {
        let mut gate = RateGate::new(25);
        gate.pace().await;
        gate.mark();

        // The provider call itself took longer than the interval.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let before = Instant::now();
        gate.pace().await;
        assert_eq!(Instant::now(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ceiling_disables_pacing() {
        let mut gate = RateGate::new(0);
        gate.pace().await;
        gate.mark();
        let before = Instant::now();
        gate.pace().await;
        assert_eq!(Instant::now(), before);
    }
}
