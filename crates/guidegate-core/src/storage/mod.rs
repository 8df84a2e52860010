//! ============================================================================
//! Storage Module - Key-value persistence behind the download ledger
//! ============================================================================
//! One interface, pluggable backends, each labeled with its durability:
//! - **redb**: embedded database file, survives restarts (Durable)
//! - **memory**: process memory only (Ephemeral)
//! - **env**: process memory with the counter seeded from an env var (Ephemeral)
//!
//! Writes go through [`WriteBatch`] so that a record update and a counter
//! increment land together or not at all.
//! ============================================================================

mod memory;
mod redb_store;

pub use memory::MemoryStorage;
pub use redb_store::{default_db_path, RedbStorage};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::StorageError;

/// Whether persisted state survives a process restart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    Durable,
    Ephemeral,
}

impl fmt::Display for Durability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Durability::Durable => write!(f, "durable"),
            Durability::Ephemeral => write!(f, "ephemeral"),
        }
    }
}

/// Description of the active backend, reported by admin stats and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub backend: String,
    pub durability: Durability,
    pub location: Option<String>,
}

impl fmt::Display for StorageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.backend, self.durability)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        Ok(())
    }
}

/// A single write inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: Vec<u8> },
    Increment { key: String },
}

/// Ordered set of writes applied atomically by [`Storage::commit`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value,
        });
        self
    }

    pub fn increment(mut self, key: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Increment { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Durable or ephemeral key-value store
pub trait Storage: Send + Sync {
    /// Read a value, `None` when the key is absent
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a single value
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Apply every op in the batch atomically.
    /// Returns the new value of each `Increment`, in batch order.
    fn commit(&self, batch: &WriteBatch) -> Result<Vec<u64>, StorageError>;

    /// All entries whose key starts with `prefix`, ordered by key
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError>;

    /// Backend name and durability class
    fn info(&self) -> StorageInfo;

    /// Increment a counter and return its new value
    fn atomic_increment(&self, key: &str) -> Result<u64, StorageError> {
        let values = self.commit(&WriteBatch::new().increment(key))?;
        values
            .first()
            .copied()
            .ok_or_else(|| StorageError::Backend("increment produced no value".to_string()))
    }
}

/// Counters are stored as 8 little-endian bytes
pub fn encode_counter(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn decode_counter(key: &str, bytes: &[u8]) -> Result<u64, StorageError> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("expected 8 counter bytes, found {}", bytes.len()),
    })?;
    Ok(u64::from_le_bytes(raw))
}

/// Next counter value, rejecting overflow
pub(crate) fn bump(key: &str, current: u64) -> Result<u64, StorageError> {
    current
        .checked_add(1)
        .ok_or_else(|| StorageError::Overflow(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_encoding() {
        let bytes = encode_counter(42);
        assert_eq!(decode_counter("c", &bytes).unwrap(), 42);
        assert!(matches!(
            decode_counter("c", &[1, 2, 3]),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_bump_overflow() {
        assert_eq!(bump("c", 1).unwrap(), 2);
        assert_eq!(bump("c", u64::MAX), Err(StorageError::Overflow("c".into())));
    }

    #[test]
    fn test_storage_info_display() {
        let info = StorageInfo {
            backend: "redb".into(),
            durability: Durability::Durable,
            location: Some("/tmp/x.redb".into()),
        };
        assert_eq!(info.to_string(), "redb (durable) at /tmp/x.redb");

        let info = StorageInfo {
            backend: "memory".into(),
            durability: Durability::Ephemeral,
            location: None,
        };
        assert_eq!(info.to_string(), "memory (ephemeral)");
    }
}
