//! Long-polling update loop.
//!
//! Updates are acknowledged by advancing the offset before their handlers
//! finish; each handler runs on its own task so a slow upload never holds up
//! other users.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use guidegate_core::platform::{CallbackQuery, IncomingMessage, Update};
use guidegate_core::{CallbackRequest, DeliveryGate, TelegramClient};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bot commands we answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stats,
}

/// Poll until Ctrl-C
pub async fn run(client: Arc<TelegramClient>, gate: Arc<DeliveryGate<TelegramClient>>, poll_timeout: Duration) {
    let mut offset: Option<i64> = None;
    let mut backoff = Duration::from_secs(1);

    info!("Polling for updates (timeout {:?})", poll_timeout);

    loop {
        let updates = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                return;
            }
            result = client.get_updates(offset, poll_timeout) => result,
        };

        match updates {
            Ok(updates) => {
                backoff = Duration::from_secs(1);
                for update in updates {
                    offset = Some(update.update_id + 1);
                    let gate = gate.clone();
                    tokio::spawn(async move { dispatch(&gate, update).await });
                }
            }
            Err(e) => {
                warn!("getUpdates failed: {} (retrying in {:?})", e, backoff);
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn dispatch(gate: &DeliveryGate<TelegramClient>, update: Update) {
    if let Some(query) = update.callback_query {
        let request = callback_request(&query);
        if let Some(report) = gate.handle_callback(&request).await {
            debug!("Update {}: {:?} via {:?}", update.update_id, report.outcome, report.trail);
        }
        return;
    }

    if let Some(message) = update.message {
        handle_message(gate, &message).await;
    }
}

async fn handle_message(gate: &DeliveryGate<TelegramClient>, message: &IncomingMessage) {
    let Some(from) = &message.from else {
        return;
    };
    match message.text.as_deref().and_then(parse_command) {
        Some(Command::Start) => gate.handle_start(from.user_id(), &from.first_name).await,
        Some(Command::Stats) => {
            gate.handle_stats(from.user_id()).await;
        }
        None => debug!("Ignoring message from {}", from.id),
    }
}

fn callback_request(query: &CallbackQuery) -> CallbackRequest {
    CallbackRequest {
        callback_id: query.id.clone(),
        user: query.from.user_id(),
        message: query.message.as_ref().map(IncomingMessage::message_ref),
        data: query.data.clone(),
    }
}

/// `/start`, `/help` and `/stats`, with or without a `@botname` suffix
fn parse_command(text: &str) -> Option<Command> {
    let word = text.split_whitespace().next()?;
    let command = word.strip_prefix('/')?.split('@').next()?;
    match command {
        "start" | "help" => Some(Command::Start),
        "stats" => Some(Command::Stats),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidegate_core::{MessageRef, UserId};

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/start promo"), Some(Command::Start));
        assert_eq!(parse_command("/help"), Some(Command::Start));
        assert_eq!(parse_command("/stats@guide_bot"), Some(Command::Stats));
        assert_eq!(parse_command("stats"), None);
        assert_eq!(parse_command("/delete"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_callback_request_from_query() {
        let query: CallbackQuery = serde_json::from_value(serde_json::json!({
            "id": "4382bfdwdsb323b2d9",
            "from": { "id": 77, "first_name": "Ann" },
            "message": { "message_id": 12, "chat": { "id": 77 }, "text": "Hi" },
            "data": "request_asset"
        }))
        .unwrap();

        let request = callback_request(&query);
        assert_eq!(request.callback_id, "4382bfdwdsb323b2d9");
        assert_eq!(request.user, UserId(77));
        assert_eq!(request.message, Some(MessageRef { chat_id: 77, message_id: 12 }));
        assert_eq!(request.data.as_deref(), Some("request_asset"));
    }
}
