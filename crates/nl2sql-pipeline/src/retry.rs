use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded exponential backoff.
///
/// The caller owns the attempt counter; the policy only maps
/// `(retries so far, time left)` to a decision, so the same inputs always
/// produce the same schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `retries_so_far + 1`, uncapped by deadline.
    pub fn delay_for(&self, retries_so_far: u32) -> Duration {
        let factor = 2u32.saturating_pow(retries_so_far.min(16));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Give up once the budget is spent or the backoff would not leave
    /// time for another attempt before the run deadline.
    pub fn decide(&self, retries_so_far: u32, remaining: Duration) -> RetryDecision {
        if retries_so_far >= self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = self.delay_for(retries_so_far);
        if delay >= remaining {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(delay)
    }

    /// Worst-case time spent sleeping across a full retry budget.
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries).map(|n| self.delay_for(n)).sum()
    }
}
