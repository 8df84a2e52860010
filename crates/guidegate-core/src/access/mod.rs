//! ============================================================================
//! Access Module - Channel-membership gating
//! ============================================================================
//! Decides whether a user may receive the asset based on their current
//! membership in the gated channel.
//!
//! ## Eligibility
//! - **Member / Administrator / Owner**: eligible
//! - **Left / Kicked / Restricted / Unknown**: not eligible
//! - **Lookup failed**: resolved by the configured [`FailPolicy`]
//!
//! ## Usage
//! ```rust,ignore
//! use guidegate_core::access::{FailPolicy, MembershipOracle};
//!
//! let oracle = MembershipOracle::new(platform, "@channel");
//! let (check, decision) = oracle.decide(user, FailPolicy::FailClosed).await;
//! ```
//! ============================================================================

mod oracle;
mod retry;
mod types;

// Re-export public types
pub use oracle::{MembershipOracle, DEFAULT_ORACLE_BUDGET_SECS, DEFAULT_ORACLE_TIMEOUT_SECS};
pub use retry::{calculate_delay, RetryConfig};
pub use types::{AccessDecision, FailPolicy, MembershipCheck, MembershipStatus};
