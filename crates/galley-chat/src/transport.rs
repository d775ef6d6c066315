//! Chat transport seam.
//!
//! Delivery is somebody else's library; the conversation engine consumes
//! exactly this surface: send, edit, delete, markup, callback ack, pin.
//! The transport is expected to dispatch updates for one user serially
//! (per-key dispatch), which is what makes FSM transitions linear without
//! any per-user locking here.

use anyhow::Result;
use async_trait::async_trait;

pub type ChatId = i64;
pub type MessageId = i64;
pub type UserId = i64;

/// Inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Markup {
    Inline(Vec<Vec<InlineButton>>),
    Reply(Vec<Vec<String>>),
    RemoveReply,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: Option<Markup>,
    ) -> Result<MessageId>;

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        markup: Option<Markup>,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    async fn edit_reply_markup(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        markup: Option<Markup>,
    ) -> Result<()>;

    /// Must be the first action of every callback handler: it removes the
    /// client-side spinner instantly.
    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;

    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;
}

/// One incoming update, already reduced to what the engine needs.
#[derive(Debug, Clone)]
pub struct Update {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub kind: UpdateKind,
}

#[derive(Debug, Clone)]
pub enum UpdateKind {
    Text {
        message_id: MessageId,
        text: String,
    },
    Callback {
        callback_id: String,
        message_id: MessageId,
        data: String,
    },
    /// Downloaded photo payloads of one message (invoice intake).
    Photos {
        message_id: MessageId,
        images: Vec<Vec<u8>>,
    },
}

impl Update {
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::Callback { data, .. } => Some(data),
            _ => None,
        }
    }
}
