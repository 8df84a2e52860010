//! ============================================================================
//! Memory Storage - Ephemeral backend for hosts without a writable disk
//! ============================================================================
//! Everything lives in process memory and is lost on restart. The `env`
//! flavour only differs in its label: the ledger seeds its counter from an
//! environment variable at startup, writes are never exported back.
//! ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{bump, decode_counter, encode_counter, Durability, Storage, StorageInfo, WriteBatch, WriteOp};
use crate::types::StorageError;

/// In-memory key-value store
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    label: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            label: "memory".to_string(),
        }
    }

    /// Memory storage whose counter comes from the named environment variable
    pub fn env_seeded(var: &str) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            label: format!("env:{}", var),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn commit(&self, batch: &WriteBatch) -> Result<Vec<u64>, StorageError> {
        let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;

        // Stage every write first so a failing op leaves the map untouched
        let mut staged: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let mut counters = Vec::new();
        for op in batch.ops() {
            match op {
                WriteOp::Put { key, value } => {
                    staged.insert(key.clone(), value.clone());
                }
                WriteOp::Increment { key } => {
                    let current = match staged.get(key).or_else(|| entries.get(key)) {
                        Some(bytes) => decode_counter(key, bytes)?,
                        None => 0,
                    };
                    let next = bump(key, current)?;
                    staged.insert(key.clone(), encode_counter(next).to_vec());
                    counters.push(next);
                }
            }
        }

        entries.extend(staged);
        Ok(counters)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn info(&self) -> StorageInfo {
        StorageInfo {
            backend: self.label.clone(),
            durability: Durability::Ephemeral,
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_batch_increments_report_new_values() {
        let storage = MemoryStorage::new();
        let batch = WriteBatch::new()
            .increment("a")
            .put("r", b"x".to_vec())
            .increment("a")
            .increment("b");
        assert_eq!(storage.commit(&batch).unwrap(), vec![1, 2, 1]);
        assert_eq!(storage.get("r").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_failed_batch_leaves_state_untouched() {
        let storage = MemoryStorage::new();
        storage.put("bad", b"no").unwrap();

        let batch = WriteBatch::new().put("r", b"x".to_vec()).increment("bad");
        assert!(storage.commit(&batch).is_err());
        assert_eq!(storage.get("r").unwrap(), None);
    }

    #[test]
    fn test_concurrent_increments() {
        let storage = Arc::new(MemoryStorage::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = storage.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        storage.atomic_increment("c").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(storage.atomic_increment("c").unwrap(), 801);
    }

    #[test]
    fn test_labels() {
        assert_eq!(MemoryStorage::new().info().backend, "memory");
        let env = MemoryStorage::env_seeded("DOWNLOAD_COUNTER").info();
        assert_eq!(env.backend, "env:DOWNLOAD_COUNTER");
        assert_eq!(env.durability, Durability::Ephemeral);
    }
}
