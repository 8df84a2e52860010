//! ============================================================================
//! Retry Logic - Exponential Backoff for Platform Calls
//! ============================================================================
//! Provides backoff delays for retrying membership lookups:
//! - Exponential backoff with jitter
//! - Rate-limit hints from the platform take precedence (capped)
//! ============================================================================

use std::time::Duration;

use crate::types::PlatformError;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Base delay between retries (will be multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            max_delay_ms: 5000,
            jitter: true,
        }
    }
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // Add random jitter (0-50% of delay)
        let jitter_factor = 1.0 + (rand_simple() * 0.5);
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Delay before retrying after `error`
pub fn delay_for(error: &PlatformError, attempt: u32, config: &RetryConfig) -> Duration {
    match error {
        PlatformError::RateLimited {
            retry_after: Some(hint),
        } => (*hint).min(Duration::from_millis(config.max_delay_ms)),
        _ => calculate_delay(attempt, config),
    }
}

/// Simple pseudo-random number generator (0.0 to 1.0)
fn rand_simple() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            jitter: false,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let config = no_jitter();
        assert_eq!(calculate_delay(0, &config), Duration::from_millis(500));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(2000));
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(5000));
        assert_eq!(calculate_delay(u32::MAX, &config), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_bounds() {
        let config = RetryConfig::default();
        for _ in 0..20 {
            let delay = calculate_delay(0, &config);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(750));
        }
    }

    #[test]
    fn test_rate_limit_hint_is_capped() {
        let config = no_jitter();
        let short = PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        };
        let long = PlatformError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(delay_for(&short, 0, &config), Duration::from_secs(2));
        assert_eq!(delay_for(&long, 0, &config), Duration::from_millis(5000));
        assert_eq!(
            delay_for(&PlatformError::Timeout, 0, &config),
            Duration::from_millis(500)
        );
    }
}
