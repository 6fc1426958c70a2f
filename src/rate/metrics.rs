use std::time::Duration;

use serde::Serialize;

/// Call statistics for one operation name, across all clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    /// Calls rejected because no token became available in time.
    pub rate_limited: u64,
    pub total_duration_ms: u64,
    pub total_wait_ms: u64,
}

impl OperationMetrics {
    pub(super) fn record_attempt(&mut self, duration: Duration, success: bool) {
        self.attempts += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration_ms += duration.as_millis() as u64;
    }

    pub(super) fn record_wait(&mut self, waited: Duration, acquired: bool) {
        self.total_wait_ms += waited.as_millis() as u64;
        if !acquired {
            self.rate_limited += 1;
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    pub fn average_duration(&self) -> Duration {
        if self.attempts == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(self.total_duration_ms / self.attempts)
        }
    }
}
