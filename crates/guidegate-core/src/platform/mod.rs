//! ============================================================================
//! Platform Module - Messaging platform seam
//! ============================================================================
//! The gate only needs five operations from the messaging platform:
//! - `get_chat_member`: channel membership status for a user
//! - `send_document`:   upload the asset to a user
//! - `send_message`:    plain message with an optional inline keyboard
//! - `answer_callback`: acknowledge a button press (optionally as an alert)
//! - `edit_message`:    rewrite a message the bot sent earlier
//!
//! `TelegramClient` implements them over the Bot API; `MockPlatform` records
//! calls for tests.
//! ============================================================================

pub mod mock;
mod telegram;

pub use mock::{MockPlatform, SentItem};
pub use telegram::{
    CallbackQuery, Chat, IncomingMessage, TelegramClient, TelegramUser, Update, TELEGRAM_API,
};

use async_trait::async_trait;
use futures_util::Stream;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;

use crate::access::MembershipStatus;
use crate::types::{MessageRef, PlatformError, UserId};

/// Operations the gate depends on
#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Membership status of `user` in `channel`
    async fn get_chat_member(
        &self,
        channel: &str,
        user: UserId,
    ) -> Result<MembershipStatus, PlatformError>;

    /// Send a document to the user's private chat
    async fn send_document(&self, user: UserId, document: Document) -> Result<(), PlatformError>;

    /// Send a text message to the user's private chat
    async fn send_message(
        &self,
        user: UserId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PlatformError>;

    /// Acknowledge a callback query
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), PlatformError>;

    /// Replace the text (and keyboard) of an existing message
    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PlatformError>;
}

/// Body of a document, read chunk by chunk while it is uploaded
pub type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Vec<u8>>> + Send>>;

/// File payload for `send_document`. The body owns the open file, so
/// dropping the document on any path releases it.
pub struct Document {
    pub file_name: String,
    /// Size in bytes, announced ahead of the streamed body
    pub length: u64,
    pub caption: Option<String>,
    pub body: ChunkStream,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("file_name", &self.file_name)
            .field("length", &self.length)
            .field("caption", &self.caption)
            .finish_non_exhaustive()
    }
}

/// Inline keyboard attached below a message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// One button per row
    pub fn column(buttons: Vec<InlineButton>) -> Self {
        Self {
            inline_keyboard: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }

    pub fn single(button: InlineButton) -> Self {
        Self::column(vec![button])
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.inline_keyboard.iter().flatten()
    }

    /// Whether any button carries this callback data
    pub fn has_callback(&self, data: &str) -> bool {
        self.buttons()
            .any(|b| matches!(&b.action, ButtonAction::CallbackData(d) if d == data))
    }

    /// Whether any button links to this URL
    pub fn has_url(&self, url: &str) -> bool {
        self.buttons()
            .any(|b| matches!(&b.action, ButtonAction::Url(u) if u == url))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineButton {
    pub text: String,
    #[serde(flatten)]
    pub action: ButtonAction,
}

impl InlineButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::CallbackData(data.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// What pressing a button does
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    CallbackData(String),
    Url(String),
}
