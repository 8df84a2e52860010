//! ============================================================================
//! Bot Configuration - Environment-driven settings
//! ============================================================================
//! Every value comes from the process environment (a `.env` file is loaded by
//! the binary before this runs). The count policy and the fail policy have no
//! default: a deployment must choose them.
//! ============================================================================

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::access::{
    FailPolicy, RetryConfig, DEFAULT_ORACLE_BUDGET_SECS, DEFAULT_ORACLE_TIMEOUT_SECS,
};
use crate::ledger::{CountPolicy, DownloadLedger};
use crate::storage::{MemoryStorage, RedbStorage, Storage};
use crate::types::UserId;

/// Env var holding the seed for the `env` storage backend
pub const COUNTER_SEED_VAR: &str = "DOWNLOAD_COUNTER";

const DEFAULT_ASSET_PATH: &str = "guide.pdf";
const DEFAULT_CAPTION: &str = "Here is your guide!\n\nShare the channel with your friends";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;

/// Which storage backend holds the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// redb file, survives restarts
    Redb { path: Option<PathBuf> },
    /// Process memory only
    Memory,
    /// Process memory, counter seeded from `DOWNLOAD_COUNTER`
    Env { seed: u64 },
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Redb { .. } => write!(f, "redb"),
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Env { .. } => write!(f, "env"),
        }
    }
}

impl StorageBackend {
    /// Open the backend and the ledger on top of it
    pub fn open_ledger(&self, policy: CountPolicy) -> Result<DownloadLedger> {
        let storage: Arc<dyn Storage> = match self {
            StorageBackend::Redb { path } => Arc::new(
                RedbStorage::open(path.as_deref())
                    .map_err(|e| anyhow!("Failed to open redb storage: {}", e))?,
            ),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
            StorageBackend::Env { .. } => Arc::new(MemoryStorage::env_seeded(COUNTER_SEED_VAR)),
        };

        let ledger = DownloadLedger::open(storage, policy)
            .map_err(|e| anyhow!("Failed to open download ledger: {}", e))?;

        if let StorageBackend::Env { seed } = self {
            ledger
                .seed_counter(*seed)
                .map_err(|e| anyhow!("Failed to seed download counter: {}", e))?;
        }

        Ok(ledger)
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    /// Channel to check, e.g. `@channel` or a numeric chat id
    pub channel_id: String,
    /// Link used by subscribe / go-to-channel buttons
    pub channel_url: String,
    pub asset_path: PathBuf,
    pub asset_caption: Option<String>,
    pub admin_id: UserId,
    pub admin_contact_url: String,
    pub count_policy: CountPolicy,
    pub fail_policy: FailPolicy,
    pub storage: StorageBackend,
    pub oracle_timeout: Duration,
    /// Bound on a whole membership check, retries included
    pub oracle_budget: Duration,
    pub oracle_retry: RetryConfig,
    pub poll_timeout: Duration,
}

impl BotConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).ok_or_else(|| anyhow!("{} is not set", key));

        let bot_token = require("BOT_TOKEN")?;
        let channel_id = require("CHANNEL_ID")?;
        let admin_id: UserId = parse_value("ADMIN_ID", &require("ADMIN_ID")?)?;
        let count_policy: CountPolicy = parse_value("COUNT_POLICY", &require("COUNT_POLICY")?)?;
        let fail_policy: FailPolicy = parse_value("FAIL_POLICY", &require("FAIL_POLICY")?)?;

        let channel_url = get("CHANNEL_URL").unwrap_or_else(|| default_channel_url(&channel_id));
        let admin_contact_url =
            get("ADMIN_CONTACT_URL").unwrap_or_else(|| format!("tg://user?id={}", admin_id));

        let storage = match get("STORAGE_BACKEND")
            .unwrap_or_else(|| "redb".to_string())
            .to_lowercase()
            .as_str()
        {
            "redb" => StorageBackend::Redb {
                path: get("GUIDEGATE_DB_PATH").map(PathBuf::from),
            },
            "memory" => StorageBackend::Memory,
            "env" => StorageBackend::Env {
                seed: get(COUNTER_SEED_VAR)
                    .map(|v| parse_value::<u64>(COUNTER_SEED_VAR, &v))
                    .transpose()?
                    .unwrap_or(0),
            },
            other => {
                return Err(anyhow!(
                    "Unknown STORAGE_BACKEND '{}'. Valid values: redb, memory, env",
                    other
                ))
            }
        };

        let oracle_timeout_secs = get("ORACLE_TIMEOUT_SECS")
            .map(|v| parse_value::<u64>("ORACLE_TIMEOUT_SECS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_ORACLE_TIMEOUT_SECS);
        let oracle_budget_secs = get("ORACLE_BUDGET_SECS")
            .map(|v| parse_value::<u64>("ORACLE_BUDGET_SECS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_ORACLE_BUDGET_SECS);
        let mut oracle_retry = RetryConfig::default();
        if let Some(v) = get("ORACLE_RETRY_DELAY_MS") {
            oracle_retry.base_delay_ms = parse_value("ORACLE_RETRY_DELAY_MS", &v)?;
        }
        let poll_timeout_secs = get("POLL_TIMEOUT_SECS")
            .map(|v| parse_value::<u64>("POLL_TIMEOUT_SECS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS);

        Ok(Self {
            bot_token,
            channel_id,
            channel_url,
            asset_path: PathBuf::from(get("ASSET_PATH").unwrap_or_else(|| DEFAULT_ASSET_PATH.to_string())),
            asset_caption: Some(get("ASSET_CAPTION").unwrap_or_else(|| DEFAULT_CAPTION.to_string())),
            admin_id,
            admin_contact_url,
            count_policy,
            fail_policy,
            storage,
            oracle_timeout: Duration::from_secs(oracle_timeout_secs),
            oracle_budget: Duration::from_secs(oracle_budget_secs),
            oracle_retry,
            poll_timeout: Duration::from_secs(poll_timeout_secs),
        })
    }

    /// One-line summary for startup logs (no secrets)
    pub fn log_summary(&self) {
        info!(
            "Config: channel={} asset={} count_policy={} fail_policy={} storage={}",
            self.channel_id,
            self.asset_path.display(),
            self.count_policy,
            self.fail_policy,
            self.storage
        );
    }
}

fn parse_value<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| anyhow!("Invalid {} '{}': {}", key, value, e))
}

/// `@name` links to t.me/name, a numeric `-100…` id to its t.me/c/ link
fn default_channel_url(channel_id: &str) -> String {
    match channel_id.strip_prefix('@') {
        Some(name) => format!("https://t.me/{}", name),
        None => format!("https://t.me/c/{}", channel_id.trim_start_matches("-100")),
    }
}
