//! ============================================================================
//! guidegate-bot - Telegram entry point
//! ============================================================================
//! Loads configuration from the environment, opens the download ledger and
//! long-polls the Bot API until interrupted.
//! ============================================================================

mod polling;

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tracing::{info, warn};

use guidegate_core::{BotConfig, DeliveryGate, TelegramClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guidegate_bot=debug".parse()?)
                .add_directive("guidegate_core=debug".parse()?),
        )
        .init();

    info!("Starting guidegate bot");

    let config = BotConfig::from_env()?;
    config.log_summary();

    if !config.asset_path.exists() {
        warn!(
            "Asset {} does not exist yet, requests will be answered with an apology",
            config.asset_path.display()
        );
    }

    let ledger = Arc::new(config.storage.open_ledger(config.count_policy)?);
    let stats = ledger
        .stats()
        .map_err(|e| anyhow!("Failed to read download ledger: {}", e))?;
    info!(
        "Downloads so far: {} ({} unique) on {}",
        stats.global_count, stats.unique_recipients, stats.storage
    );

    let client = Arc::new(TelegramClient::new(&config.bot_token));
    let me = client
        .get_me()
        .await
        .map_err(|e| anyhow!("Bot token rejected by Telegram: {}", e))?;
    info!(
        "Authorized as @{} ({})",
        me.username.as_deref().unwrap_or("unknown"),
        me.id
    );

    let gate = Arc::new(DeliveryGate::from_config(client.clone(), ledger, &config));
    polling::run(client, gate, config.poll_timeout).await;

    info!("guidegate bot stopped");
    Ok(())
}
