//! Outbound messaging contract.
//!
//! The domain describes messages as [`RenderRequest`]s and hands them to a
//! [`Notifier`]. Delivery is best-effort: callers log a [`NotifyError`] and
//! carry on.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicI32, Ordering},
};

use async_trait::async_trait;
use store::{LastAction, UserId};
use thiserror::Error;

use crate::action::ActionToken;

/// A Telegram chat. Private chats share the user's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

impl From<UserId> for ChatId {
    fn from(user: UserId) -> Self {
        ChatId(user.get())
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a message that was already sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat: ChatId,
    pub message_id: i32,
}

impl MessageRef {
    pub fn new(chat: ChatId, message_id: i32) -> Self {
        Self { chat, message_id }
    }

    /// Converts into the session pointer stored for later edits.
    pub fn to_last_action(self, event: impl Into<String>) -> LastAction {
        LastAction {
            event: event.into(),
            chat_id: self.chat.0,
            message_id: self.message_id,
        }
    }
}

impl From<&LastAction> for MessageRef {
    fn from(action: &LastAction) -> Self {
        MessageRef::new(ChatId(action.chat_id), action.message_id)
    }
}

/// An inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ActionToken,
}

impl Button {
    pub fn new(label: impl Into<String>, action: ActionToken) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

/// Rows of inline buttons.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, row: Vec<Button>) -> Self {
        if !row.is_empty() {
            self.rows.push(row);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates over all buttons, row by row.
    pub fn buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }
}

/// A message to send or an edit to apply.
///
/// `text` is HTML. An empty keyboard removes any existing controls when used
/// for an edit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderRequest {
    pub text: String,
    /// Telegram file id of a lead image.
    pub image: Option<String>,
    pub keyboard: Keyboard,
}

impl RenderRequest {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }

    pub fn with_image(mut self, image: Option<String>) -> Self {
        self.image = image;
        self
    }
}

/// Errors delivering a message.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The recipient blocked the bot or never started it.
    #[error("recipient {0} is unreachable")]
    Unreachable(ChatId),

    /// The message to edit no longer exists or cannot be edited.
    #[error("message {message_id} in chat {chat} cannot be edited")]
    NotEditable { chat: ChatId, message_id: i32 },

    /// Any other transport failure.
    #[error("delivery failed: {0}")]
    Transport(String),
}

/// Delivers rendered messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat: ChatId, message: RenderRequest) -> Result<MessageRef, NotifyError>;

    async fn edit(&self, target: MessageRef, message: RenderRequest) -> Result<(), NotifyError>;
}

#[async_trait]
impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    async fn send(&self, chat: ChatId, message: RenderRequest) -> Result<MessageRef, NotifyError> {
        (**self).send(chat, message).await
    }

    async fn edit(&self, target: MessageRef, message: RenderRequest) -> Result<(), NotifyError> {
        (**self).edit(target, message).await
    }
}

/// One delivery seen by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Sent {
        message: MessageRef,
        request: RenderRequest,
    },
    Edited {
        message: MessageRef,
        request: RenderRequest,
    },
}

impl SentMessage {
    pub fn chat(&self) -> ChatId {
        match self {
            SentMessage::Sent { message, .. } | SentMessage::Edited { message, .. } => message.chat,
        }
    }

    pub fn request(&self) -> &RenderRequest {
        match self {
            SentMessage::Sent { request, .. } | SentMessage::Edited { request, .. } => request,
        }
    }

    pub fn is_edit(&self) -> bool {
        matches!(self, SentMessage::Edited { .. })
    }
}

/// In-memory notifier for testing.
///
/// Records every delivery and can be switched to fail, simulating a
/// recipient that blocked the bot.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<SentMessage>>,
    next_message_id: AtomicI32,
    should_fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following delivery fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Returns all deliveries so far.
    pub fn messages(&self) -> Vec<SentMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the deliveries addressed to one chat.
    pub fn messages_to(&self, chat: ChatId) -> Vec<SentMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.chat() == chat)
            .collect()
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, message: SentMessage) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat: ChatId, request: RenderRequest) -> Result<MessageRef, NotifyError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::Unreachable(chat));
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = MessageRef::new(chat, message_id);
        self.record(SentMessage::Sent { message, request });
        Ok(message)
    }

    async fn edit(&self, target: MessageRef, request: RenderRequest) -> Result<(), NotifyError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(NotifyError::NotEditable {
                chat: target.chat,
                message_id: target.message_id,
            });
        }
        self.record(SentMessage::Edited {
            message: target,
            request,
        });
        Ok(())
    }
}
