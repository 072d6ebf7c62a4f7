use crate::types::ItemDisposition;
use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Exponential backoff without jitter: the k-th retry waits `2^k` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    #[must_use]
    pub const fn backoff(attempt_count: u32) -> Duration {
        Duration::from_secs(2_u64.saturating_pow(attempt_count))
    }

    /// Where an item goes after a failed run that had already used
    /// `attempt_count` retries.
    #[must_use]
    pub fn disposition(
        &self,
        attempt_count: u32,
        retryable: bool,
        failed_at: DateTime<Utc>,
    ) -> ItemDisposition {
        if !retryable || attempt_count >= self.max_retries {
            return ItemDisposition::Fail;
        }
        let delay = TimeDelta::from_std(Self::backoff(attempt_count)).unwrap_or(TimeDelta::MAX);
        ItemDisposition::Requeue {
            attempt_count: attempt_count + 1,
            available_at: failed_at
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::RetryPolicy;
    use crate::types::ItemDisposition;
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::time::Duration;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(RetryPolicy::backoff(0), Duration::from_secs(1));
        assert_eq!(RetryPolicy::backoff(1), Duration::from_secs(2));
        assert_eq!(RetryPolicy::backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn retryable_failure_below_ceiling_is_requeued_with_delay() {
        let failed_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let disposition = RetryPolicy::default().disposition(2, true, failed_at);
        assert_eq!(
            disposition,
            ItemDisposition::Requeue {
                attempt_count: 3,
                available_at: failed_at + TimeDelta::seconds(4),
            }
        );
    }

    #[test]
    fn ceiling_reached_or_structural_error_fails_terminally() {
        let now = Utc::now();
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.disposition(3, true, now), ItemDisposition::Fail);
        assert_eq!(policy.disposition(0, false, now), ItemDisposition::Fail);
        assert_eq!(RetryPolicy::new(0).disposition(0, true, now), ItemDisposition::Fail);
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        let now = Utc::now();
        let disposition = RetryPolicy::new(u32::MAX).disposition(200, true, now);
        assert!(matches!(
            disposition,
            ItemDisposition::Requeue { attempt_count: 201, available_at } if available_at > now
        ));
    }
}
