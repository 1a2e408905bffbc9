//! Alert policy.

use chrono::TimeDelta;
use rust_decimal::Decimal;
use std::time::Duration;

/// When and how often low-balance alerts fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPolicy {
    /// Alerts fire only for balances strictly below this amount.
    pub threshold: Decimal,
    /// Minimum gap between two alerts for the same group member. A gap of
    /// exactly this length is not enough.
    pub interval: TimeDelta,
    /// Pause after each notification sent during a sweep.
    pub send_pause: Duration,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            threshold: Decimal::from(30),
            interval: TimeDelta::hours(24),
            send_pause: Duration::from_secs(1),
        }
    }
}

impl AlertPolicy {
    pub fn with_threshold(mut self, threshold: Decimal) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: TimeDelta) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_send_pause(mut self, pause: Duration) -> Self {
        self.send_pause = pause;
        self
    }
}
