use std::time::Duration;

use tokio_retry::strategy::ExponentialBackoff;

/// Exponential delay after consecutive failures: `min`, `2 * min`, `4 * min`,
/// ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    strategy: ExponentialBackoff,
    failures: u32,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            strategy: strategy(min, max),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Records a failure and returns how long to wait before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        // The strategy yields 2x the wanted delay so that millisecond
        // rounding never drops below `min`.
        let delay = self.strategy.next().unwrap_or(self.max * 2) / 2;
        delay.clamp(self.min, self.max)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.strategy = strategy(self.min, self.max);
    }
}

fn strategy(min: Duration, max: Duration) -> ExponentialBackoff {
    ExponentialBackoff::from_millis(2)
        .factor(min.as_millis().max(1) as u64)
        .max_delay(max * 2)
}
