use super::job::ProcessingJob;
use std::time::Duration;

/// Exponential retry schedule for transactions whose receipts are not final yet.
///
/// The k-th reschedule of a job waits `initial_delay * 2^k`; after `retry_limit`
/// reschedules the job is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBackoff {
    pub initial_delay: Duration,
    pub retry_limit: u32,
}

pub(crate) enum RetryDisposition {
    Retry(Duration),
    Exhausted,
}

impl RetryBackoff {
    pub fn new(initial_delay: Duration, retry_limit: u32) -> Self {
        Self {
            initial_delay,
            retry_limit,
        }
    }

    /// Advances the job's retry state, returning the delay before the next attempt.
    pub(crate) fn advance(&self, job: &mut ProcessingJob) -> RetryDisposition {
        if job.retry_count >= self.retry_limit {
            return RetryDisposition::Exhausted;
        }

        job.retry_count += 1;
        job.next_delay = next_backoff(job.next_delay);
        RetryDisposition::Retry(job.next_delay)
    }

    /// Delay used for the `retry`-th reschedule (1-based).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let multiplier = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(multiplier)
    }

    /// Longest time a job can spend in the queue before being dropped.
    pub fn max_residency(&self) -> Duration {
        (0..=self.retry_limit).fold(Duration::ZERO, |total, retry| {
            total.saturating_add(self.delay_for_retry(retry))
        })
    }
}

fn next_backoff(current: Duration) -> Duration {
    if current.is_zero() {
        return Duration::from_millis(1);
    }
    current.saturating_mul(2)
}
