//! ============================================================================
//! Telegram Client - Bot API over HTTPS
//! ============================================================================
//! Implements [`MessagingPlatform`] with the Telegram Bot API:
//! - getChatMember, sendDocument, sendMessage, answerCallbackQuery,
//!   editMessageText for the gate
//! - getUpdates for the long-polling runner
//! ============================================================================

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::{Document, InlineKeyboard, MessagingPlatform};
use crate::access::MembershipStatus;
use crate::types::{MessageRef, PlatformError, UserId};

/// Telegram Bot API base URL
pub const TELEGRAM_API: &str = "https://api.telegram.org";

/// Default bound on a single (non-polling) API call
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for the Telegram Bot API
pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl TelegramClient {
    /// Create a new client with the bot token
    pub fn new(bot_token: &str) -> Self {
        Self::with_base_url(TELEGRAM_API, bot_token)
    }

    /// Create a client against a custom API server (local Bot API server, tests)
    pub fn with_base_url(api_url: &str, bot_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), bot_token),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_timeout: Duration,
    ) -> Result<Vec<Update>, PlatformError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: poll_timeout.as_secs(),
            allowed_updates: vec!["message", "callback_query"],
        };
        // The HTTP request has to outlive the server-side poll
        self.call("getUpdates", &request, poll_timeout + Duration::from_secs(10))
            .await
    }

    /// Identity of the bot, used as a startup credential check
    pub async fn get_me(&self) -> Result<TelegramUser, PlatformError> {
        self.call("getMe", &serde_json::json!({}), self.request_timeout)
            .await
    }

    async fn call<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, PlatformError> {
        debug!("Calling Telegram {}", method);

        let response = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;

        parse_response(method, response).await
    }
}

fn map_transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout
    } else {
        PlatformError::Network(e.to_string())
    }
}

async fn parse_response<T: DeserializeOwned>(
    method: &str,
    response: reqwest::Response,
) -> Result<T, PlatformError> {
    let status = response.status();
    let body = response.bytes().await.map_err(map_transport_error)?;
    decode_envelope(method, status, &body)
}

/// Decode a Bot API envelope. A body that is not an envelope (a proxy's
/// 502/504 page) is a server error when the HTTP status says so.
fn decode_envelope<T: DeserializeOwned>(
    method: &str,
    status: StatusCode,
    body: &[u8],
) -> Result<T, PlatformError> {
    match serde_json::from_slice::<ApiResponse<T>>(body) {
        Ok(envelope) => envelope.into_result(),
        Err(_) if status.is_server_error() => Err(PlatformError::Server {
            code: i64::from(status.as_u16()),
            description: format!("{} returned a non-JSON body", method),
        }),
        Err(e) => Err(PlatformError::Decode(format!(
            "{} (HTTP {}): {}",
            method, status, e
        ))),
    }
}

#[async_trait]
impl MessagingPlatform for TelegramClient {
    async fn get_chat_member(
        &self,
        channel: &str,
        user: UserId,
    ) -> Result<MembershipStatus, PlatformError> {
        let request = GetChatMemberRequest {
            chat_id: channel,
            user_id: user.0,
        };
        let member: ChatMember = self
            .call("getChatMember", &request, self.request_timeout)
            .await?;
        Ok(MembershipStatus::from_api(&member.status))
    }

    async fn send_document(&self, user: UserId, document: Document) -> Result<(), PlatformError> {
        info!(
            "Sending document {} ({} bytes) to {}",
            document.file_name, document.length, user
        );

        let part = Part::stream_with_length(Body::wrap_stream(document.body), document.length)
            .file_name(document.file_name);
        let mut form = Form::new()
            .text("chat_id", user.0.to_string())
            .part("document", part);
        if let Some(caption) = document.caption {
            form = form.text("caption", caption);
        }

        // Uploads get a longer bound than plain calls
        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .timeout(self.request_timeout * 4)
            .multipart(form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let _: serde_json::Value = parse_response("sendDocument", response).await?;
        Ok(())
    }

    async fn send_message(
        &self,
        user: UserId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PlatformError> {
        let request = SendMessageRequest {
            chat_id: user.0,
            text,
            reply_markup: keyboard,
        };
        let _: serde_json::Value = self
            .call("sendMessage", &request, self.request_timeout)
            .await?;
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), PlatformError> {
        let request = AnswerCallbackRequest {
            callback_query_id: callback_id,
            text,
            show_alert: alert,
        };
        let _: bool = self
            .call("answerCallbackQuery", &request, self.request_timeout)
            .await?;
        Ok(())
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PlatformError> {
        let request = EditMessageRequest {
            chat_id: message.chat_id,
            message_id: message.message_id,
            text,
            reply_markup: keyboard,
        };
        let _: serde_json::Value = self
            .call("editMessageText", &request, self.request_timeout)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Telegram API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

impl<T> ApiResponse<T> {
    fn into_result(self) -> Result<T, PlatformError> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| PlatformError::Decode("ok response without result".to_string()));
        }

        let code = self.error_code.unwrap_or_default();
        let description = self.description.unwrap_or_default();
        if code == 429 {
            return Err(PlatformError::RateLimited {
                retry_after: self
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs),
            });
        }
        if code >= 500 {
            return Err(PlatformError::Server { code, description });
        }
        if description.to_lowercase().contains("chat not found") {
            return Err(PlatformError::ChatNotFound(description));
        }
        Err(PlatformError::Api { code, description })
    }
}

#[derive(Debug, Serialize)]
struct GetUpdatesRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
struct GetChatMemberRequest<'a> {
    chat_id: &'a str,
    user_id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatMember {
    status: String,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboard>,
}

#[derive(Debug, Serialize)]
struct AnswerCallbackRequest<'a> {
    callback_query_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    show_alert: bool,
}

#[derive(Debug, Serialize)]
struct EditMessageRequest<'a> {
    chat_id: i64,
    message_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboard>,
}

/// Incoming update from getUpdates
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

impl IncomingMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramUser {
    pub fn user_id(&self) -> UserId {
        UserId(self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: TelegramUser,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
    #[serde(default)]
    pub data: Option<String>,
}
