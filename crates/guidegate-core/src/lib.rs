//! ============================================================================
//! GUIDEGATE-CORE: Subscription-gated asset delivery
//! ============================================================================
//! This crate holds all logic behind the guidegate bot:
//! - Channel membership checks with timeout, retry and a fail policy
//! - Asset delivery through a messaging platform (Telegram Bot API)
//! - Durable download ledger with an atomic global counter (redb)
//! - The per-request delivery gate that ties them together
//! ============================================================================

pub mod access;
pub mod config;
pub mod delivery;
pub mod gate;
pub mod ledger;
pub mod platform;
pub mod storage;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use access::{FailPolicy, MembershipOracle};
pub use config::{BotConfig, StorageBackend};
pub use delivery::{AssetDelivery, DeliveryOutcome};
pub use gate::{CallbackRequest, DeliveryGate, GateOutcome, GateReport, StatsReply};
pub use ledger::{CountPolicy, DeliveryReceipt, DownloadLedger, DownloadRecord, LedgerStats};
pub use platform::{MessagingPlatform, TelegramClient};
pub use storage::{MemoryStorage, RedbStorage, Storage};
