//! ============================================================================
//! Core Types for guidegate
//! ============================================================================
//! Identifiers shared by every component plus the domain error enums that
//! cross component boundaries (storage and messaging platform failures).
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Platform-assigned user identifier (Telegram user id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(UserId)
    }
}

/// A message previously sent by the bot, addressable for edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Errors raised by a storage backend
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt value under key '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Counter overflow under key '{0}'")]
    Overflow(String),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Ledger was created with the '{stored}' count policy, refusing to open with '{requested}'")]
    PolicyMismatch { stored: String, requested: String },
}

/// Errors raised by the messaging platform
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlatformError {
    #[error("Platform request timed out")]
    Timeout,

    #[error("Rate limited by platform (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Chat not found: {0}")]
    ChatNotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Platform server error {code}: {description}")]
    Server { code: i64, description: String },

    #[error("Platform API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Failed to decode platform response: {0}")]
    Decode(String),
}

impl PlatformError {
    /// Whether the failure is worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Timeout
                | PlatformError::RateLimited { .. }
                | PlatformError::ChatNotFound(_)
                | PlatformError::Network(_)
                | PlatformError::Server { .. }
        )
    }
}
