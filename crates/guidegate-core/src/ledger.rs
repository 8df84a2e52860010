//! ============================================================================
//! Download Ledger - Atomic download counter with per-user records
//! ============================================================================
//! Sole owner of the storage handle. Every mutation goes through
//! `record_delivery`, which reads the user's record, decides whether the
//! global counter moves, and commits record + counter as one batch while
//! holding the ledger's writer lock.
//!
//! Key layout:
//! - `counter:downloads`    global counter (u64, little-endian)
//! - `downloads:<user_id>`  bincode-encoded [`DownloadRecord`]
//! - `meta:count_policy`    policy the store was created with
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::storage::{decode_counter, encode_counter, Storage, StorageInfo, WriteBatch};
use crate::types::{StorageError, UserId};

const COUNTER_KEY: &str = "counter:downloads";
const RECORD_PREFIX: &str = "downloads:";
const POLICY_KEY: &str = "meta:count_policy";

/// Counting rule, fixed for the life of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountPolicy {
    /// Only a user's first successful delivery moves the counter
    Dedup,
    /// Every successful delivery moves the counter
    NoDedup,
}

impl CountPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountPolicy::Dedup => "dedup",
            CountPolicy::NoDedup => "no_dedup",
        }
    }
}

impl fmt::Display for CountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "dedup" => Ok(CountPolicy::Dedup),
            "no_dedup" | "nodedup" => Ok(CountPolicy::NoDedup),
            other => Err(format!(
                "Unknown count policy '{}'. Valid values: dedup, no_dedup",
                other
            )),
        }
    }
}

/// Per-user delivery record, created on the first successful delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub user_id: UserId,
    pub delivered: bool,
    /// Unix seconds of the first successful delivery
    pub first_delivered_at: i64,
    pub last_delivered_at: i64,
    /// Successful deliveries to this user, counted under either policy
    pub deliveries: u64,
}

/// Result of recording one successful delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub global_count: u64,
    pub first_time: bool,
}

/// Snapshot used by admin stats and the inspection CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub global_count: u64,
    pub unique_recipients: usize,
    pub policy: CountPolicy,
    pub storage: StorageInfo,
}

/// Download ledger over a storage backend
pub struct DownloadLedger {
    storage: Arc<dyn Storage>,
    policy: CountPolicy,
    writer: Mutex<()>,
}

impl DownloadLedger {
    /// Open the ledger, stamping the policy on first use and refusing a
    /// store that was created under a different one
    pub fn open(storage: Arc<dyn Storage>, policy: CountPolicy) -> Result<Self, StorageError> {
        match storage.get(POLICY_KEY)? {
            Some(bytes) => {
                let stored = String::from_utf8_lossy(&bytes).to_string();
                if stored != policy.as_str() {
                    return Err(StorageError::PolicyMismatch {
                        stored,
                        requested: policy.as_str().to_string(),
                    });
                }
            }
            None => {
                storage.put(POLICY_KEY, policy.as_str().as_bytes())?;
                info!("Ledger initialised with '{}' count policy", policy);
            }
        }

        info!("Download ledger ready on {}", storage.info());

        Ok(Self {
            storage,
            policy,
            writer: Mutex::new(()),
        })
    }

    /// Policy a store was stamped with, if it has been opened before
    pub fn stored_policy(storage: &dyn Storage) -> Result<Option<CountPolicy>, StorageError> {
        storage
            .get(POLICY_KEY)?
            .map(|bytes| {
                let stored = String::from_utf8_lossy(&bytes).to_string();
                stored.parse::<CountPolicy>().map_err(|reason| StorageError::Corrupt {
                    key: POLICY_KEY.to_string(),
                    reason,
                })
            })
            .transpose()
    }

    pub fn policy(&self) -> CountPolicy {
        self.policy
    }

    pub fn storage_info(&self) -> StorageInfo {
        self.storage.info()
    }

    /// Record one successful delivery to `user`.
    /// Must only be called after the asset actually reached the user.
    pub fn record_delivery(&self, user: UserId) -> Result<DeliveryReceipt, StorageError> {
        let _guard = self.writer.lock().map_err(|_| StorageError::Poisoned)?;

        let now = chrono::Utc::now().timestamp();
        let key = record_key(user);
        let existing = self.read_record(&key)?;
        let first_time = existing.is_none();

        let record = match existing {
            Some(mut record) => {
                record.delivered = true;
                record.last_delivered_at = now;
                record.deliveries = record.deliveries.saturating_add(1);
                record
            }
            None => DownloadRecord {
                user_id: user,
                delivered: true,
                first_delivered_at: now,
                last_delivered_at: now,
                deliveries: 1,
            },
        };
        let encoded = bincode::serialize(&record).map_err(|e| StorageError::Corrupt {
            key: key.clone(),
            reason: format!("Failed to serialize record: {}", e),
        })?;

        let moves_counter = match self.policy {
            CountPolicy::Dedup => first_time,
            CountPolicy::NoDedup => true,
        };

        let global_count = if moves_counter {
            let batch = WriteBatch::new().put(key, encoded).increment(COUNTER_KEY);
            let values = self.storage.commit(&batch)?;
            values
                .first()
                .copied()
                .ok_or_else(|| StorageError::Backend("increment produced no value".to_string()))?
        } else {
            self.storage.commit(&WriteBatch::new().put(key, encoded))?;
            self.read_counter()?
        };

        debug!(
            "Recorded delivery to {} (first_time={}, global_count={})",
            user, first_time, global_count
        );

        Ok(DeliveryReceipt {
            global_count,
            first_time,
        })
    }

    /// Current global counter
    pub fn global_count(&self) -> Result<u64, StorageError> {
        self.read_counter()
    }

    /// Delivery record for a single user
    pub fn record(&self, user: UserId) -> Result<Option<DownloadRecord>, StorageError> {
        self.read_record(&record_key(user))
    }

    /// All delivery records, ordered by storage key
    pub fn records(&self) -> Result<Vec<DownloadRecord>, StorageError> {
        self.storage
            .scan_prefix(RECORD_PREFIX)?
            .into_iter()
            .map(|(key, bytes)| decode_record(&key, &bytes))
            .collect()
    }

    /// Number of users that received the asset at least once
    pub fn unique_recipients(&self) -> Result<usize, StorageError> {
        Ok(self.storage.scan_prefix(RECORD_PREFIX)?.len())
    }

    pub fn stats(&self) -> Result<LedgerStats, StorageError> {
        Ok(LedgerStats {
            global_count: self.global_count()?,
            unique_recipients: self.unique_recipients()?,
            policy: self.policy,
            storage: self.storage_info(),
        })
    }

    /// Initialise an empty counter (env-seeded deployments).
    /// Returns false and leaves the counter alone if it already has a value.
    pub fn seed_counter(&self, value: u64) -> Result<bool, StorageError> {
        let _guard = self.writer.lock().map_err(|_| StorageError::Poisoned)?;

        if self.storage.get(COUNTER_KEY)?.is_some() {
            return Ok(false);
        }
        self.storage.put(COUNTER_KEY, &encode_counter(value))?;
        info!("Seeded download counter at {}", value);
        Ok(true)
    }

    fn read_counter(&self) -> Result<u64, StorageError> {
        match self.storage.get(COUNTER_KEY)? {
            Some(bytes) => decode_counter(COUNTER_KEY, &bytes),
            None => Ok(0),
        }
    }

    fn read_record(&self, key: &str) -> Result<Option<DownloadRecord>, StorageError> {
        self.storage
            .get(key)?
            .map(|bytes| decode_record(key, &bytes))
            .transpose()
    }
}

fn record_key(user: UserId) -> String {
    format!("{}{}", RECORD_PREFIX, user)
}

fn decode_record(key: &str, bytes: &[u8]) -> Result<DownloadRecord, StorageError> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Corrupt {
        key: key.to_string(),
        reason: format!("Failed to deserialize record: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStorage, RedbStorage};

    fn memory_ledger(policy: CountPolicy) -> DownloadLedger {
        DownloadLedger::open(Arc::new(MemoryStorage::new()), policy).unwrap()
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!("dedup".parse::<CountPolicy>().unwrap(), CountPolicy::Dedup);
        assert_eq!("No-Dedup".parse::<CountPolicy>().unwrap(), CountPolicy::NoDedup);
        assert!("sometimes".parse::<CountPolicy>().is_err());
    }

    #[test]
    fn test_dedup_counts_each_user_once() {
        let ledger = memory_ledger(CountPolicy::Dedup);

        let first = ledger.record_delivery(UserId(1)).unwrap();
        assert_eq!(first, DeliveryReceipt { global_count: 1, first_time: true });

        for _ in 0..3 {
            let again = ledger.record_delivery(UserId(1)).unwrap();
            assert_eq!(again, DeliveryReceipt { global_count: 1, first_time: false });
        }

        let record = ledger.record(UserId(1)).unwrap().unwrap();
        assert!(record.delivered);
        assert_eq!(record.deliveries, 4);
        assert!(record.last_delivered_at >= record.first_delivered_at);

        let second = ledger.record_delivery(UserId(2)).unwrap();
        assert_eq!(second, DeliveryReceipt { global_count: 2, first_time: true });
        assert_eq!(ledger.unique_recipients().unwrap(), 2);
    }

    #[test]
    fn test_no_dedup_counts_every_delivery() {
        let ledger = memory_ledger(CountPolicy::NoDedup);

        assert_eq!(ledger.record_delivery(UserId(7)).unwrap().global_count, 1);
        let again = ledger.record_delivery(UserId(7)).unwrap();
        assert_eq!(again, DeliveryReceipt { global_count: 2, first_time: false });
        assert_eq!(ledger.global_count().unwrap(), 2);
        assert_eq!(ledger.unique_recipients().unwrap(), 1);
    }

    #[test]
    fn test_policy_is_fixed_per_store() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        DownloadLedger::open(storage.clone(), CountPolicy::Dedup).unwrap();

        assert_eq!(
            DownloadLedger::stored_policy(storage.as_ref()).unwrap(),
            Some(CountPolicy::Dedup)
        );

        let err = DownloadLedger::open(storage.clone(), CountPolicy::NoDedup).err();
        assert!(matches!(err, Some(StorageError::PolicyMismatch { .. })));
        assert!(DownloadLedger::open(storage, CountPolicy::Dedup).is_ok());
    }

    #[test]
    fn test_seed_counter_only_when_empty() {
        let ledger = memory_ledger(CountPolicy::NoDedup);
        assert!(ledger.seed_counter(41).unwrap());
        assert!(!ledger.seed_counter(5).unwrap());
        assert_eq!(ledger.record_delivery(UserId(3)).unwrap().global_count, 42);
    }

    #[test]
    fn test_storage_failure_reports_no_count() {
        let storage = Arc::new(MemoryStorage::new());
        storage.put(COUNTER_KEY, b"garbage").unwrap();
        let ledger = DownloadLedger::open(storage.clone(), CountPolicy::Dedup).unwrap();

        assert!(ledger.record_delivery(UserId(9)).is_err());
        // The record must not be written without its increment
        assert_eq!(ledger.record(UserId(9)).unwrap(), None);
    }

    #[test]
    fn test_concurrent_distinct_users_lose_nothing() {
        let ledger = Arc::new(memory_ledger(CountPolicy::Dedup));
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.record_delivery(UserId(i)).unwrap())
            })
            .collect();

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.first_time)
            .count();
        assert_eq!(firsts, 32);
        assert_eq!(ledger.global_count().unwrap(), 32);
    }

    #[test]
    fn test_concurrent_same_user_counts_once() {
        let ledger = Arc::new(memory_ledger(CountPolicy::Dedup));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || ledger.record_delivery(UserId(5)).unwrap())
            })
            .collect();

        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.first_time)
            .count();
        assert_eq!(firsts, 1);
        assert_eq!(ledger.global_count().unwrap(), 1);
        assert_eq!(ledger.record(UserId(5)).unwrap().unwrap().deliveries, 16);
    }

    #[test]
    fn test_redb_ledger_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.redb");
        {
            let storage = Arc::new(RedbStorage::open(Some(&path)).unwrap());
            let ledger = DownloadLedger::open(storage, CountPolicy::Dedup).unwrap();
            ledger.record_delivery(UserId(1)).unwrap();
            ledger.record_delivery(UserId(2)).unwrap();
        }

        let storage = Arc::new(RedbStorage::open(Some(&path)).unwrap());
        let ledger = DownloadLedger::open(storage, CountPolicy::Dedup).unwrap();
        assert_eq!(ledger.global_count().unwrap(), 2);
        let again = ledger.record_delivery(UserId(1)).unwrap();
        assert_eq!(again, DeliveryReceipt { global_count: 2, first_time: false });

        let records = ledger.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].user_id, UserId(1));
    }
}
