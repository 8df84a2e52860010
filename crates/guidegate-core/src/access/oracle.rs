//! ============================================================================
//! Membership Oracle - Channel membership verification
//! ============================================================================
//! Asks the platform for the user's status in the gated channel on every
//! request (membership can change at any time, nothing is cached). Each call
//! is bounded by a timeout and the whole check by a budget; transient
//! failures are retried with backoff.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::retry::{delay_for, RetryConfig};
use super::types::{AccessDecision, FailPolicy, MembershipCheck};
use crate::platform::MessagingPlatform;
use crate::types::{PlatformError, UserId};

/// Default bound on one membership lookup
pub const DEFAULT_ORACLE_TIMEOUT_SECS: u64 = 10;
/// Default bound on a whole check, retries included. Telegram stops
/// accepting answers to a callback query after roughly 15 seconds.
pub const DEFAULT_ORACLE_BUDGET_SECS: u64 = 12;

/// Membership oracle for a single channel
pub struct MembershipOracle<P: MessagingPlatform> {
    platform: Arc<P>,
    channel: String,
    call_timeout: Duration,
    budget: Duration,
    retry: RetryConfig,
}

impl<P: MessagingPlatform> MembershipOracle<P> {
    /// Create an oracle for `channel` with default timeout and retry settings
    pub fn new(platform: Arc<P>, channel: impl Into<String>) -> Self {
        Self {
            platform,
            channel: channel.into(),
            call_timeout: Duration::from_secs(DEFAULT_ORACLE_TIMEOUT_SECS),
            budget: Duration::from_secs(DEFAULT_ORACLE_BUDGET_SECS),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Bound the whole check, so a slow platform cannot outlive the callback
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Classify the user's current channel membership
    pub async fn check_membership(&self, user: UserId) -> MembershipCheck {
        match timeout(self.budget, self.lookup(user)).await {
            Ok(check) => check,
            Err(_) => {
                warn!("Membership check for {} exceeded {:?}", user, self.budget);
                MembershipCheck::OracleError(format!(
                    "Membership check exceeded {:?}",
                    self.budget
                ))
            }
        }
    }

    async fn lookup(&self, user: UserId) -> MembershipCheck {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = PlatformError::Timeout;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = delay_for(&last_error, attempt - 1, &self.retry);
                debug!("Membership retry {} for {} after {:?}", attempt, user, delay);
                sleep(delay).await;
            }

            let result = match timeout(
                self.call_timeout,
                self.platform.get_chat_member(&self.channel, user),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(PlatformError::Timeout),
            };

            match result {
                Ok(status) => {
                    let check = MembershipCheck::from_status(status);
                    info!("Membership of {} in {}: {:?}", user, self.channel, status);
                    return check;
                }
                Err(e) => {
                    warn!(
                        "Membership lookup attempt {} for {} failed: {}",
                        attempt + 1,
                        user,
                        e
                    );
                    if !e.is_transient() {
                        return MembershipCheck::OracleError(e.to_string());
                    }
                    last_error = e;
                }
            }
        }

        MembershipCheck::OracleError(format!(
            "Membership lookup failed after {} attempts: {}",
            attempts, last_error
        ))
    }

    /// Check membership and resolve oracle failures with `policy`
    pub async fn decide(&self, user: UserId, policy: FailPolicy) -> (MembershipCheck, AccessDecision) {
        let check = self.check_membership(user).await;
        let decision = check.decide(policy);
        if let MembershipCheck::OracleError(reason) = &check {
            warn!(
                "Membership of {} unknown ({}), applying {}: {:?}",
                user, reason, policy, decision
            );
        }
        (check, decision)
    }
}
