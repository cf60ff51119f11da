//! Per-task coalescing window: arms to `min` on the first unprocessed
//! change, refreshes on each subsequent change, but never delays past
//! `max` since the first change in the burst.

use std::time::Duration;

use tokio::time::Instant;

use crate::task::BufferPeriodConfig;

pub struct BufferPeriod {
    min: Duration,
    max: Duration,
    enabled: bool,
    first_change_at: Option<Instant>,
}

impl BufferPeriod {
    pub fn new(config: BufferPeriodConfig) -> Self {
        Self {
            min: config.min,
            max: config.max,
            enabled: config.enabled,
            first_change_at: None,
        }
    }

    /// Records a change observed at `now` and returns the deadline the
    /// caller should next wake at. Disabled buffering fires
    /// immediately.
    pub fn arm(&mut self, now: Instant) -> Instant {
        if !self.enabled {
            return now;
        }
        let first = *self.first_change_at.get_or_insert(now);
        let max_deadline = first + self.max;
        let min_deadline = now + self.min;
        min_deadline.min(max_deadline)
    }

    /// Clears the burst once its apply has been dispatched.
    pub fn reset(&mut self) {
        self.first_change_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(min_secs: u64, max_secs: u64) -> BufferPeriodConfig {
        BufferPeriodConfig {
            enabled: true,
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    #[test]
    fn disabled_buffer_fires_immediately() {
        let mut buffer = BufferPeriod::new(BufferPeriodConfig {
            enabled: false,
            min: Duration::from_secs(5),
            max: Duration::from_secs(20),
        });
        let now = Instant::now();
        assert_eq!(buffer.arm(now), now);
    }

    #[test]
    fn first_change_arms_to_min() {
        let mut buffer = BufferPeriod::new(cfg(1, 5));
        let now = Instant::now();
        let deadline = buffer.arm(now);
        assert_eq!(deadline, now + Duration::from_secs(1));
    }

    #[test]
    fn repeated_changes_never_exceed_max_since_first() {
        let mut buffer = BufferPeriod::new(cfg(1, 3));
        let t0 = Instant::now();
        buffer.arm(t0);
        let deadline = buffer.arm(t0 + Duration::from_secs(3));
        assert_eq!(deadline, t0 + Duration::from_secs(3));
    }
}
