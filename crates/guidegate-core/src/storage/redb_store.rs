// ============================================================================
// RedbStorage - Durable Storage Backend (redb)
// ============================================================================
// Persistent local storage for the download counter and delivery records.
// Default path: ~/.guidegate/downloads.redb (override via GUIDEGATE_DB_PATH)
// ============================================================================

use redb::{Database, ReadableTable, TableDefinition};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{bump, decode_counter, encode_counter, Durability, Storage, StorageInfo, WriteBatch, WriteOp};
use crate::types::StorageError;

const LEDGER: TableDefinition<&str, &[u8]> = TableDefinition::new("ledger");

fn backend<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> StorageError {
    move |e| StorageError::Backend(format!("{}: {}", context, e))
}

/// Embedded database holding the ledger table
pub struct RedbStorage {
    db: Database,
    path: PathBuf,
}

impl RedbStorage {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses GUIDEGATE_DB_PATH env var or ~/.guidegate/downloads.redb
    pub fn open(path: Option<&Path>) -> Result<Self, StorageError> {
        let db_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_db_path()?,
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(backend("Failed to create database directory"))?;
        }

        info!("Opening database at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(backend("Failed to open database"))?;

        // Ensure the table exists so read transactions never miss it
        let write_txn = db.begin_write().map_err(backend("Failed to begin write"))?;
        {
            let _ = write_txn
                .open_table(LEDGER)
                .map_err(backend("Failed to create ledger table"))?;
        }
        write_txn.commit().map_err(backend("Failed to commit init"))?;

        info!("Database ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// GUIDEGATE_DB_PATH, falling back to ~/.guidegate/downloads.redb
pub fn default_db_path() -> Result<PathBuf, StorageError> {
    if let Ok(env_path) = std::env::var("GUIDEGATE_DB_PATH") {
        return Ok(PathBuf::from(env_path));
    }
    let home = dirs::home_dir()
        .ok_or_else(|| StorageError::Backend("Cannot determine home directory".to_string()))?;
    Ok(home.join(".guidegate").join("downloads.redb"))
}

impl Storage for RedbStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let read_txn = self.db.begin_read().map_err(backend("Failed to begin read"))?;
        let table = read_txn
            .open_table(LEDGER)
            .map_err(backend("Failed to open ledger table"))?;

        let value = table
            .get(key)
            .map_err(backend("Failed to get value"))?
            .map(|guard| guard.value().to_vec());
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.commit(&WriteBatch::new().put(key, value.to_vec()))?;
        Ok(())
    }

    fn commit(&self, batch: &WriteBatch) -> Result<Vec<u64>, StorageError> {
        let mut counters = Vec::new();

        // A dropped (uncommitted) write transaction is rolled back, so an early
        // return leaves the file at its last committed state
        let write_txn = self.db.begin_write().map_err(backend("Failed to begin write"))?;
        {
            let mut table = write_txn
                .open_table(LEDGER)
                .map_err(backend("Failed to open ledger table"))?;

            for op in batch.ops() {
                match op {
                    WriteOp::Put { key, value } => {
                        table
                            .insert(key.as_str(), value.as_slice())
                            .map_err(backend("Failed to insert value"))?;
                    }
                    WriteOp::Increment { key } => {
                        let current = match table
                            .get(key.as_str())
                            .map_err(backend("Failed to read counter"))?
                        {
                            Some(guard) => decode_counter(key, guard.value())?,
                            None => 0,
                        };
                        let next = bump(key, current)?;
                        table
                            .insert(key.as_str(), encode_counter(next).as_slice())
                            .map_err(backend("Failed to write counter"))?;
                        counters.push(next);
                    }
                }
            }
        }
        write_txn.commit().map_err(backend("Failed to commit"))?;

        debug!("Committed batch of {} ops", batch.ops().len());
        Ok(counters)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let read_txn = self.db.begin_read().map_err(backend("Failed to begin read"))?;
        let table = read_txn
            .open_table(LEDGER)
            .map_err(backend("Failed to open ledger table"))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(prefix..)
            .map_err(backend("Failed to iterate ledger"))?;
        for entry in iter {
            let (key, value) = entry.map_err(backend("Failed to read entry"))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_string(), value.value().to_vec()));
        }
        Ok(results)
    }

    fn info(&self) -> StorageInfo {
        StorageInfo {
            backend: "redb".to_string(),
            durability: Durability::Durable,
            location: Some(self.path.display().to_string()),
        }
    }
}
