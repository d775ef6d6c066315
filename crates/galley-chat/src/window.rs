//! Single-window UX helpers.
//!
//! Every workflow keeps at most one menu, one header, and one prompt
//! message alive in the chat. Handlers edit in place wherever possible;
//! user input is deleted after consumption; long steps show an hourglass
//! that is later edited with the result.

use anyhow::Result;
use tracing::debug;

use crate::fsm::FsmStorage;
use crate::transport::{ChatId, ChatTransport, Markup, MessageId, UserId};

pub const HOURGLASS: &str = "⏳";

/// Edit the tracked prompt in place, or send-and-track when there is none
/// (first step of a flow, or the previous prompt was cleaned up).
pub async fn show_prompt(
    transport: &dyn ChatTransport,
    fsm: &FsmStorage,
    user_id: UserId,
    chat_id: ChatId,
    text: &str,
    markup: Option<Markup>,
) -> Result<MessageId> {
    let mut tracked = fsm.tracked(user_id).await?;

    if let Some(message_id) = tracked.prompt_msg_id {
        match transport
            .edit_message(chat_id, message_id, text, markup.clone())
            .await
        {
            Ok(()) => return Ok(message_id),
            Err(e) => debug!(message_id, error = %e, "prompt edit failed; resending"),
        }
    }

    let message_id = transport.send_message(chat_id, text, markup).await?;
    tracked.prompt_msg_id = Some(message_id);
    fsm.set_tracked(user_id, tracked).await?;
    Ok(message_id)
}

/// Same edit-or-send discipline for the running summary header.
pub async fn show_header(
    transport: &dyn ChatTransport,
    fsm: &FsmStorage,
    user_id: UserId,
    chat_id: ChatId,
    text: &str,
) -> Result<MessageId> {
    let mut tracked = fsm.tracked(user_id).await?;

    if let Some(message_id) = tracked.header_msg_id {
        if transport
            .edit_message(chat_id, message_id, text, None)
            .await
            .is_ok()
        {
            return Ok(message_id);
        }
    }

    let message_id = transport.send_message(chat_id, text, None).await?;
    tracked.header_msg_id = Some(message_id);
    fsm.set_tracked(user_id, tracked).await?;
    Ok(message_id)
}

/// Reply-keyboard menus cannot be edited: delete the previous one, send
/// the new one, track its id.
pub async fn show_menu(
    transport: &dyn ChatTransport,
    fsm: &FsmStorage,
    user_id: UserId,
    chat_id: ChatId,
    text: &str,
    markup: Markup,
) -> Result<MessageId> {
    let mut tracked = fsm.tracked(user_id).await?;

    if let Some(message_id) = tracked.menu_msg_id.take() {
        if let Err(e) = transport.delete_message(chat_id, message_id).await {
            debug!(message_id, error = %e, "stale menu delete failed");
        }
    }

    let message_id = transport.send_message(chat_id, text, Some(markup)).await?;
    tracked.menu_msg_id = Some(message_id);
    fsm.set_tracked(user_id, tracked).await?;
    Ok(message_id)
}

/// Delete the user's own input message after it has been consumed.
pub async fn consume_input(
    transport: &dyn ChatTransport,
    chat_id: ChatId,
    message_id: MessageId,
) {
    if let Err(e) = transport.delete_message(chat_id, message_id).await {
        debug!(message_id, error = %e, "input delete failed");
    }
}

/// Replace the prompt with the hourglass placeholder before a slow step;
/// the caller edits it again with the outcome.
pub async fn show_busy(
    transport: &dyn ChatTransport,
    fsm: &FsmStorage,
    user_id: UserId,
    chat_id: ChatId,
) -> Result<MessageId> {
    show_prompt(transport, fsm, user_id, chat_id, HOURGLASS, None).await
}
