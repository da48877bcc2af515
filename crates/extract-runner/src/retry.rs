use chrono::Duration;
use extract_core::config::{RetryConfig, RetryPolicyKind};

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Fixed(Duration),
    /// `base * 2^(n - 1)` after the n-th failure, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let base = seconds(config.base_delay_secs);
        match config.policy {
            RetryPolicyKind::Fixed => RetryPolicy::Fixed(base),
            RetryPolicyKind::Exponential => RetryPolicy::Exponential {
                base,
                max: seconds(config.max_delay_secs),
            },
        }
    }

    /// Delay after the `failed_attempts`-th failure of a cycle (1-based).
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { base, max } => {
                let shift = failed_attempts.saturating_sub(1).min(30);
                base.checked_mul(1 << shift)
                    .map_or(max, |delay| delay.min(max))
            }
        }
    }
}

fn seconds(secs: u64) -> Duration {
    Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1_000))
}
