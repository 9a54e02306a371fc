use std::time;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Backoff applied by a worker between polls that failed with a transient error.
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: time::Duration,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: time::Duration,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// Delay before retry number `attempt` (starting at 0), never above `maximum_interval`.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let multiplier = self.backoff_coefficient.saturating_pow(attempt);
        let candidate_interval = self.initial_interval.saturating_mul(multiplier);

        std::cmp::min(candidate_interval, self.maximum_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_millis(100),
            maximum_interval: time::Duration::from_secs(5),
        }
    }
}
