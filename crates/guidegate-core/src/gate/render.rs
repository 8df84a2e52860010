//! User-facing texts and keyboards for each gate outcome.

use super::state::{RECHECK_MEMBERSHIP, REQUEST_ASSET};
use crate::ledger::LedgerStats;
use crate::platform::{InlineButton, InlineKeyboard};

pub const RECHECK_NOTICE: &str = "You are not subscribed yet. Subscribe and try again.";
pub const STATS_REJECTED: &str = "🚫 This command is only available to the administrator";

pub fn welcome(first_name: &str, channel_id: &str) -> (String, InlineKeyboard) {
    let name = if first_name.is_empty() { "there" } else { first_name };
    let text = format!(
        "Hi, {}! 👋\n\nHere you can get our free guide.\n\n\
         ✅ To download it you need to be subscribed to the channel: {}\n\n\
         Press the button below 👇",
        name, channel_id
    );
    (text, request_keyboard())
}

pub fn request_keyboard() -> InlineKeyboard {
    InlineKeyboard::single(InlineButton::callback("📥 Get the guide", REQUEST_ASSET))
}

pub fn blocked(channel_url: &str) -> (String, InlineKeyboard) {
    let text = "❌ You are not subscribed to the channel!\n\n\
                1. Press \"Subscribe to the channel\"\n\
                2. Come back and press \"I've subscribed\""
        .to_string();
    let keyboard = InlineKeyboard::column(vec![
        InlineButton::url("📢 Subscribe to the channel", channel_url),
        InlineButton::callback("✅ I've subscribed", RECHECK_MEMBERSHIP),
    ]);
    (text, keyboard)
}

pub fn delivered(global_count: u64, channel_url: &str) -> (String, InlineKeyboard) {
    let text = format!(
        "🎉 The guide has been sent to your private messages!\n\n📊 Downloads: {}",
        global_count
    );
    (
        text,
        InlineKeyboard::single(InlineButton::url("💎 Go to the channel", channel_url)),
    )
}

pub fn asset_missing(admin_contact_url: &str) -> (String, InlineKeyboard) {
    (
        "❌ Sorry, the file is temporarily unavailable. Please contact the administrator."
            .to_string(),
        InlineKeyboard::single(InlineButton::url("✉️ Contact the administrator", admin_contact_url)),
    )
}

pub fn generic_failure() -> (String, InlineKeyboard) {
    (
        "⚠️ Something went wrong while sending the guide. Please try again later.".to_string(),
        request_keyboard(),
    )
}

pub fn stats(stats: &LedgerStats) -> String {
    format!(
        "📊 Bot statistics\n\n\
         Total downloads: {}\n\
         Unique users: {}\n\
         Count policy: {}\n\
         Storage: {}",
        stats.global_count, stats.unique_recipients, stats.policy, stats.storage
    )
}
