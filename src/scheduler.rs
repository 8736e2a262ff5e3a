use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

pub const DEFAULT_SEND_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest period accepted; tokio intervals cannot tick at zero.
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(1);

/// Paces echo requests: one tick right away, then one per period.
///
/// Ticks are not tied to replies. A tick the session could not take on time
/// is delayed rather than fired in a burst.
#[derive(Debug)]
pub struct Scheduler {
    interval: Interval,
}

impl Scheduler {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period.max(MIN_SEND_INTERVAL));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Completes at the next send time. Cancel-safe.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_INTERVAL)
    }
}
