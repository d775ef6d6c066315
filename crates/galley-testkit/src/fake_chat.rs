//! Recording chat transport.
//!
//! Tracks which messages are still alive in each chat so tests can assert
//! the single-window invariants: after cleanup at most one menu and one
//! prompt message remain.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use galley_chat::{ChatId, ChatTransport, Markup, MessageId};

#[derive(Debug, Clone, PartialEq)]
pub enum ChatOp {
    Send {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    Edit {
        chat_id: ChatId,
        message_id: MessageId,
        text: String,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
    },
    MarkupCleared {
        chat_id: ChatId,
        message_id: MessageId,
    },
    Ack {
        callback_id: String,
    },
    Pin {
        chat_id: ChatId,
        message_id: MessageId,
    },
}

#[derive(Default)]
pub struct FakeChat {
    next_id: AtomicI64,
    ops: Mutex<Vec<ChatOp>>,
    alive: Mutex<BTreeSet<(ChatId, MessageId)>>,
}

impl FakeChat {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn ops(&self) -> Vec<ChatOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Message ids still present in a chat (sent and not deleted).
    pub fn alive_messages(&self, chat_id: ChatId) -> Vec<MessageId> {
        self.alive
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == chat_id)
            .map(|(_, m)| *m)
            .collect()
    }

    pub fn sent_texts(&self, chat_id: ChatId) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                ChatOp::Send {
                    chat_id: c, text, ..
                } if c == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn edit_count(&self, chat_id: ChatId, message_id: MessageId) -> usize {
        self.ops()
            .iter()
            .filter(|op| {
                matches!(op, ChatOp::Edit { chat_id: c, message_id: m, .. }
                    if *c == chat_id && *m == message_id)
            })
            .count()
    }
}

#[async_trait]
impl ChatTransport for FakeChat {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        _markup: Option<Markup>,
    ) -> Result<MessageId> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.alive.lock().unwrap().insert((chat_id, message_id));
        self.ops.lock().unwrap().push(ChatOp::Send {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        _markup: Option<Markup>,
    ) -> Result<()> {
        if !self.alive.lock().unwrap().contains(&(chat_id, message_id)) {
            anyhow::bail!("message {message_id} not found in chat {chat_id}");
        }
        self.ops.lock().unwrap().push(ChatOp::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        if !self.alive.lock().unwrap().remove(&(chat_id, message_id)) {
            anyhow::bail!("message {message_id} already gone in chat {chat_id}");
        }
        self.ops.lock().unwrap().push(ChatOp::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn edit_reply_markup(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        _markup: Option<Markup>,
    ) -> Result<()> {
        self.ops.lock().unwrap().push(ChatOp::MarkupCleared {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> Result<()> {
        self.ops.lock().unwrap().push(ChatOp::Ack {
            callback_id: callback_id.to_string(),
        });
        Ok(())
    }

    async fn pin_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.ops.lock().unwrap().push(ChatOp::Pin {
            chat_id,
            message_id,
        });
        Ok(())
    }
}
