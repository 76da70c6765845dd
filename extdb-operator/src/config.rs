//! Operator settings.

use std::time::Duration;

/// Timeouts and scheduling knobs shared by the reconcilers and the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Deadline for opening a backend connection.
    pub connect_timeout: Duration,
    /// Deadline for each statement sent to a backend.
    pub statement_timeout: Duration,
    /// Interval of the periodic full resync.
    pub resync_interval: Duration,
    /// Reconciliation passes allowed in flight at once.
    pub max_concurrent: usize,
    /// First retry delay after a failed pass.
    pub backoff_base: Duration,
    /// Upper bound of the retry delay.
    pub backoff_max: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
            resync_interval: Duration::from_secs(300),
            max_concurrent: 4,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }
}

impl Settings {
    /// Retry delay after `failures` consecutive failed passes:
    /// `min(base * 2^(failures - 1), max)`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let settings = Settings {
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(60),
            ..Default::default()
        };
        assert_eq!(settings.backoff_delay(1), Duration::from_secs(5));
        assert_eq!(settings.backoff_delay(2), Duration::from_secs(10));
        assert_eq!(settings.backoff_delay(4), Duration::from_secs(40));
        assert_eq!(settings.backoff_delay(5), Duration::from_secs(60));
        assert_eq!(settings.backoff_delay(1000), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_failures_uses_base() {
        let settings = Settings::default();
        assert_eq!(settings.backoff_delay(0), settings.backoff_base);
    }
}
