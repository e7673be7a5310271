//! Fixed-rate tick scheduler

use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};

/// Periodic timer driving one match instance.
///
/// Armed once when the room first forms a match and then left running;
/// callers gate the actual stepping on the lifecycle's `active` flag.
pub struct TickScheduler {
    interval: Interval,
    period: Duration,
    ticks: u64,
}

impl TickScheduler {
    pub fn start(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            period,
            ticks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Timer firings since the scheduler was armed
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub async fn next_tick(&mut self) -> u64 {
        self.interval.tick().await;
        self.ticks += 1;
        self.ticks
    }
}

/// Wait for the next tick of an armed scheduler; never resolves while unarmed
pub async fn wait_tick(scheduler: &mut Option<TickScheduler>) -> u64 {
    match scheduler {
        Some(scheduler) => scheduler.next_tick().await,
        None => std::future::pending().await,
    }
}
