// ============================================================================
// guidegate-db - CLI inspection tool for the guidegate download ledger
// ============================================================================
// Usage:
//   guidegate-db stats                        Show counter and recipients
//   guidegate-db list-downloads [--limit N]   List per-user delivery records
//   guidegate-db export --format json         Export the ledger as JSON
//
// The bot holds an exclusive lock on the database file; stop it first.
// ============================================================================

use anyhow::{anyhow, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use guidegate_core::{CountPolicy, DownloadLedger, RedbStorage, Storage};

/// guidegate download ledger inspection tool
#[derive(Parser)]
#[command(name = "guidegate-db", version, about = "Inspect the guidegate download ledger")]
struct Cli {
    /// Path to the database file (default: ~/.guidegate/downloads.redb)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Count policy for a database that has never been opened by the bot
    #[arg(long, global = true)]
    policy: Option<CountPolicy>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the global counter, unique recipients and storage backend
    Stats,

    /// List delivery records, most recent first
    ListDownloads {
        /// Show at most this many records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Export full ledger contents as JSON
    Export {
        /// Output format (currently only json is supported)
        #[arg(long, default_value = "json")]
        format: String,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

/// Open the ledger under the policy it was stamped with
fn open_ledger(db_path: Option<PathBuf>, requested: Option<CountPolicy>) -> Result<DownloadLedger> {
    let storage = Arc::new(
        RedbStorage::open(db_path.as_deref())
            .map_err(|e| anyhow!("Failed to open database: {}", e))?,
    );

    let stored = DownloadLedger::stored_policy(storage.as_ref())
        .map_err(|e| anyhow!("Failed to read count policy: {}", e))?;
    let policy = stored.or(requested).ok_or_else(|| {
        anyhow!("Database has no count policy yet. Pass --policy dedup or --policy no_dedup")
    })?;

    let storage: Arc<dyn Storage> = storage;
    DownloadLedger::open(storage, policy).map_err(|e| anyhow!("{}", e))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let ledger = open_ledger(cli.db_path, cli.policy)?;

    match cli.command {
        Commands::Stats => cmd_stats(&ledger),
        Commands::ListDownloads { limit } => cmd_list_downloads(&ledger, limit),
        Commands::Export { format } => cmd_export(&ledger, &format),
    }
}

fn cmd_stats(ledger: &DownloadLedger) -> Result<()> {
    let stats = ledger.stats()?;

    println!("=== guidegate Ledger Stats ===");
    println!("Storage:   {}", stats.storage);
    println!("Policy:    {}", stats.policy);
    println!();
    println!("Downloads: {}", stats.global_count);
    println!("Unique:    {}", stats.unique_recipients);

    Ok(())
}

fn cmd_list_downloads(ledger: &DownloadLedger, limit: Option<usize>) -> Result<()> {
    let mut records = ledger.records()?;

    if records.is_empty() {
        println!("No downloads recorded.");
        return Ok(());
    }

    records.sort_by(|a, b| b.last_delivered_at.cmp(&a.last_delivered_at));
    let shown = limit.unwrap_or(records.len());

    println!(
        "{:<14}  {:<23}  {:<23}  {}",
        "USER ID", "FIRST DELIVERED", "LAST DELIVERED", "DELIVERIES"
    );
    println!("{}", "-".repeat(76));

    for record in records.iter().take(shown) {
        println!(
            "{:<14}  {:<23}  {:<23}  {}",
            record.user_id,
            format_timestamp(record.first_delivered_at),
            format_timestamp(record.last_delivered_at),
            record.deliveries
        );
    }

    println!("\n{} of {} record(s)", shown.min(records.len()), records.len());
    Ok(())
}

fn cmd_export(ledger: &DownloadLedger, format: &str) -> Result<()> {
    if format != "json" {
        anyhow::bail!("Unsupported format '{}'. Only 'json' is supported.", format);
    }

    let stats = ledger.stats()?;
    let records = ledger.records()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "stats": stats,
        "downloads": records,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidegate_core::UserId;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert!(format_timestamp(i64::MAX).starts_with("(invalid"));
    }

    #[test]
    fn test_open_ledger_uses_stored_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("downloads.redb");

        assert!(open_ledger(Some(path.clone()), None).is_err());

        {
            let ledger = open_ledger(Some(path.clone()), Some(CountPolicy::NoDedup)).unwrap();
            ledger.record_delivery(UserId(1)).unwrap();
        }

        let ledger = open_ledger(Some(path), Some(CountPolicy::Dedup)).unwrap();
        assert_eq!(ledger.policy(), CountPolicy::NoDedup);
        assert_eq!(ledger.global_count().unwrap(), 1);
    }
}
