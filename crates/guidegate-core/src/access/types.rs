//! ============================================================================
//! Access Types - Channel membership statuses and access decisions
//! ============================================================================
//! Maps the platform's membership status to eligibility, and an oracle
//! failure to a decision through the configured fail policy.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Membership status reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Member,
    Administrator,
    Owner,
    Left,
    Kicked,
    Restricted,
    Unknown,
}

impl MembershipStatus {
    /// Parse a Telegram `ChatMember.status` string
    pub fn from_api(status: &str) -> Self {
        match status {
            "member" => MembershipStatus::Member,
            "administrator" => MembershipStatus::Administrator,
            "creator" | "owner" => MembershipStatus::Owner,
            "left" => MembershipStatus::Left,
            "kicked" | "banned" => MembershipStatus::Kicked,
            "restricted" => MembershipStatus::Restricted,
            _ => MembershipStatus::Unknown,
        }
    }

    /// Whether this status grants access to the asset
    pub fn is_eligible(&self) -> bool {
        matches!(
            self,
            MembershipStatus::Member | MembershipStatus::Administrator | MembershipStatus::Owner
        )
    }
}

/// Outcome of a single membership check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipCheck {
    Eligible(MembershipStatus),
    NotEligible(MembershipStatus),
    /// The platform could not be asked (after retrying transient failures)
    OracleError(String),
}

impl MembershipCheck {
    pub fn from_status(status: MembershipStatus) -> Self {
        if status.is_eligible() {
            MembershipCheck::Eligible(status)
        } else {
            MembershipCheck::NotEligible(status)
        }
    }

    /// Collapse the check into an access decision
    pub fn decide(&self, policy: FailPolicy) -> AccessDecision {
        match self {
            MembershipCheck::Eligible(_) => AccessDecision::Granted,
            MembershipCheck::NotEligible(_) => AccessDecision::Denied,
            MembershipCheck::OracleError(_) => match policy {
                FailPolicy::FailOpen => AccessDecision::Granted,
                FailPolicy::FailClosed => AccessDecision::Denied,
            },
        }
    }
}

/// What the gate does when membership cannot be determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// Treat an oracle failure as not eligible
    FailClosed,
    /// Treat an oracle failure as eligible
    FailOpen,
}

impl fmt::Display for FailPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailPolicy::FailClosed => write!(f, "fail_closed"),
            FailPolicy::FailOpen => write!(f, "fail_open"),
        }
    }
}

impl FromStr for FailPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_closed" | "closed" => Ok(FailPolicy::FailClosed),
            "fail_open" | "open" => Ok(FailPolicy::FailOpen),
            other => Err(format!(
                "Unknown fail policy '{}'. Valid values: fail_closed, fail_open",
                other
            )),
        }
    }
}

/// Final access decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!(MembershipStatus::from_api("member"), MembershipStatus::Member);
        assert_eq!(MembershipStatus::from_api("administrator"), MembershipStatus::Administrator);
        assert_eq!(MembershipStatus::from_api("creator"), MembershipStatus::Owner);
        assert_eq!(MembershipStatus::from_api("left"), MembershipStatus::Left);
        assert_eq!(MembershipStatus::from_api("kicked"), MembershipStatus::Kicked);
        assert_eq!(MembershipStatus::from_api("restricted"), MembershipStatus::Restricted);
        assert_eq!(MembershipStatus::from_api("something_new"), MembershipStatus::Unknown);
    }

    #[test]
    fn test_eligibility() {
        let eligible = [
            MembershipStatus::Member,
            MembershipStatus::Administrator,
            MembershipStatus::Owner,
        ];
        let not_eligible = [
            MembershipStatus::Left,
            MembershipStatus::Kicked,
            MembershipStatus::Restricted,
            MembershipStatus::Unknown,
        ];

        for status in eligible {
            assert!(status.is_eligible(), "{:?} should be eligible", status);
        }
        for status in not_eligible {
            assert!(!status.is_eligible(), "{:?} should not be eligible", status);
        }
    }

    #[test]
    fn test_fail_policy_decisions() {
        let failed = MembershipCheck::OracleError("timeout".into());
        assert_eq!(failed.decide(FailPolicy::FailClosed), AccessDecision::Denied);
        assert_eq!(failed.decide(FailPolicy::FailOpen), AccessDecision::Granted);

        let member = MembershipCheck::from_status(MembershipStatus::Member);
        let left = MembershipCheck::from_status(MembershipStatus::Left);
        for policy in [FailPolicy::FailClosed, FailPolicy::FailOpen] {
            assert_eq!(member.decide(policy), AccessDecision::Granted);
            assert_eq!(left.decide(policy), AccessDecision::Denied);
        }
    }

    #[test]
    fn test_fail_policy_parsing() {
        assert_eq!("fail_closed".parse::<FailPolicy>().unwrap(), FailPolicy::FailClosed);
        assert_eq!("FAIL-OPEN".parse::<FailPolicy>().unwrap(), FailPolicy::FailOpen);
        assert!("".parse::<FailPolicy>().is_err());
    }
}
