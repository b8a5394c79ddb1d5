//! Heartbeat logging for long-running processes

use chrono::{DateTime, Duration, Utc};

use crate::infrastructure::clock::SharedClock;

/// Tracks heartbeat intervals for periodic status logging
pub struct Heartbeat {
    interval: Duration,
    last_beat: DateTime<Utc>,
    clock: SharedClock,
}

impl Heartbeat {
    pub fn new(interval_secs: u64, clock: SharedClock) -> Self {
        let last_beat = clock.now();
        Self {
            interval: Duration::seconds(interval_secs as i64),
            last_beat,
            clock,
        }
    }

    /// Check if enough time has passed since the last beat
    pub fn should_beat(&self) -> bool {
        self.clock.now() - self.last_beat >= self.interval
    }

    /// Record a heartbeat at the current time
    pub fn beat(&mut self) {
        self.last_beat = self.clock.now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_beats_after_interval() {
        let clock = Arc::new(ManualClock::at_millis(0));
        let mut heartbeat = Heartbeat::new(30, clock.clone());
        assert!(!heartbeat.should_beat());

        clock.advance(Duration::seconds(30));
        assert!(heartbeat.should_beat());

        heartbeat.beat();
        assert!(!heartbeat.should_beat());
    }
}
