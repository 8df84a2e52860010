//! Mock messaging platform for testing.

use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use super::{Document, InlineKeyboard, MessagingPlatform};
use crate::access::MembershipStatus;
use crate::types::{MessageRef, PlatformError, UserId};

/// Everything the gate sent through the platform, in call order
#[derive(Debug, Clone, PartialEq)]
pub enum SentItem {
    /// A document, with its streamed body collected
    Document {
        user: UserId,
        file_name: String,
        bytes: Vec<u8>,
        caption: Option<String>,
    },
    Message {
        user: UserId,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    CallbackAnswer {
        callback_id: String,
        text: Option<String>,
        alert: bool,
    },
    Edit {
        message: MessageRef,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
}

/// Mock platform.
///
/// Membership answers are configured per user; queued errors are returned
/// before the configured status, one per call.
pub struct MockPlatform {
    statuses: Mutex<HashMap<UserId, MembershipStatus>>,
    member_errors: Mutex<HashMap<UserId, VecDeque<PlatformError>>>,
    document_error: Mutex<Option<PlatformError>>,
    sent: Mutex<Vec<SentItem>>,
    member_calls: AtomicU32,
    hang_members: AtomicBool,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            member_errors: Mutex::new(HashMap::new()),
            document_error: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            member_calls: AtomicU32::new(0),
            hang_members: AtomicBool::new(false),
        }
    }

    /// Set a user's channel status (users default to `Left`).
    pub fn with_status(self, user: UserId, status: MembershipStatus) -> Self {
        self.set_status(user, status);
        self
    }

    pub fn set_status(&self, user: UserId, status: MembershipStatus) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(user, status);
        }
    }

    /// Queue an error for the next membership lookup of `user`.
    pub fn push_member_error(&self, user: UserId, error: PlatformError) {
        if let Ok(mut errors) = self.member_errors.lock() {
            errors.entry(user).or_default().push_back(error);
        }
    }

    /// Make every `send_document` fail with `error`.
    pub fn fail_documents(&self, error: PlatformError) {
        if let Ok(mut slot) = self.document_error.lock() {
            *slot = Some(error);
        }
    }

    /// Make every membership lookup wait forever.
    pub fn hang_membership(&self) {
        self.hang_members.store(true, Ordering::SeqCst);
    }

    /// Number of `get_chat_member` calls so far.
    pub fn member_calls(&self) -> u32 {
        self.member_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<SentItem> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Documents delivered to `user`.
    pub fn documents_for(&self, user: UserId) -> usize {
        self.sent()
            .iter()
            .filter(|item| matches!(item, SentItem::Document { user: u, .. } if *u == user))
            .count()
    }

    /// Text and keyboard of the most recent message edit.
    pub fn last_edit(&self) -> Option<(String, Option<InlineKeyboard>)> {
        self.sent().into_iter().rev().find_map(|item| match item {
            SentItem::Edit { text, keyboard, .. } => Some((text, keyboard)),
            _ => None,
        })
    }

    /// The most recent plain message.
    pub fn last_message(&self) -> Option<(UserId, String, Option<InlineKeyboard>)> {
        self.sent().into_iter().rev().find_map(|item| match item {
            SentItem::Message { user, text, keyboard } => Some((user, text, keyboard)),
            _ => None,
        })
    }

    /// Callback answers, in order.
    pub fn callback_answers(&self) -> Vec<(Option<String>, bool)> {
        self.sent()
            .into_iter()
            .filter_map(|item| match item {
                SentItem::CallbackAnswer { text, alert, .. } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, item: SentItem) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(item);
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagingPlatform for MockPlatform {
    async fn get_chat_member(
        &self,
        _channel: &str,
        user: UserId,
    ) -> Result<MembershipStatus, PlatformError> {
        self.member_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_members.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let queued = self
            .member_errors
            .lock()
            .ok()
            .and_then(|mut errors| errors.get_mut(&user).and_then(|q| q.pop_front()));
        if let Some(error) = queued {
            return Err(error);
        }

        Ok(self
            .statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(&user).copied())
            .unwrap_or(MembershipStatus::Left))
    }

    async fn send_document(&self, user: UserId, document: Document) -> Result<(), PlatformError> {
        let failure = self.document_error.lock().ok().and_then(|slot| slot.clone());
        if let Some(error) = failure {
            return Err(error);
        }

        let Document {
            file_name,
            caption,
            mut body,
            ..
        } = document;
        let mut bytes = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| PlatformError::Network(e.to_string()))?;
            bytes.extend_from_slice(&chunk);
        }

        self.record(SentItem::Document {
            user,
            file_name,
            bytes,
            caption,
        });
        Ok(())
    }

    async fn send_message(
        &self,
        user: UserId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PlatformError> {
        self.record(SentItem::Message {
            user,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        alert: bool,
    ) -> Result<(), PlatformError> {
        self.record(SentItem::CallbackAnswer {
            callback_id: callback_id.to_string(),
            text: text.map(str::to_string),
            alert,
        });
        Ok(())
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
    ) -> Result<(), PlatformError> {
        self.record(SentItem::Edit {
            message,
            text: text.to_string(),
            keyboard: keyboard.cloned(),
        });
        Ok(())
    }
}
