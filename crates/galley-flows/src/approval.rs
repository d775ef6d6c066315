//! Admin review of pending write-offs.
//!
//! The conditional update on `is_locked` is the only serialisation point
//! between admins: the first press owns the document, everyone else is
//! told so. Approval POSTs to the POS with a narrow retry — safe because
//! the document UUID is the idempotency key — then writes history, deletes
//! the pending row, and strips every admin keyboard.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use galley_chat::{InlineButton, Markup};
use galley_clients::retry_with_backoff;
use galley_db::{
    delete_pending_writeoff, insert_writeoff_history, load_pending_writeoff,
    prune_writeoff_history, release_writeoff_lock, try_lock_pending_writeoff,
    update_pending_writeoff_items, PendingWriteoffRow,
};
use galley_schemas::{DocItem, WriteoffDoc};

use crate::menu::user_error;
use crate::service::FlowDeps;

const APPROVE_BACKOFF: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(5)];

pub const MSG_ANOTHER_ADMIN: &str = "⚠️ Уже обрабатывает другой админ";

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn review_card(row: &PendingWriteoffRow) -> String {
    let mut out = format!(
        "📝 Акт №{} от {}\nСклад: {}\nСчёт: {}\nПричина: {}\n",
        row.doc_id, row.author_name, row.store_name, row.account_name, row.reason
    );
    for (i, item) in items_of(&row.items).iter().enumerate() {
        let qty = item.quantity.normalize();
        let unit = item.measure_unit.clone().unwrap_or_default();
        out.push_str(&format!("{}. {} — {} {}\n", i + 1, item.product_name, qty, unit));
    }
    out
}

pub fn review_markup(doc_id: &str) -> Markup {
    Markup::Inline(vec![vec![
        InlineButton::new("✅ Провести", format!("wo:approve:{doc_id}")),
        InlineButton::new("✏️ Изменить", format!("wo:edit:{doc_id}")),
        InlineButton::new("❌ Отклонить", format!("wo:reject:{doc_id}")),
    ]])
}

fn edit_markup(row: &PendingWriteoffRow) -> Markup {
    let mut rows: Vec<Vec<InlineButton>> = Vec::new();
    for (i, item) in items_of(&row.items).iter().enumerate() {
        rows.push(vec![
            InlineButton::new(
                format!("➖ {}", item.product_name),
                format!("wo:adj:{}:{}:m", row.doc_id, i),
            ),
            InlineButton::new("➕", format!("wo:adj:{}:{}:p", row.doc_id, i)),
        ]);
    }
    rows.push(vec![
        InlineButton::new("✅ Провести", format!("wo:approve:{}", row.doc_id)),
        InlineButton::new("↩️ Назад", format!("wo:unlock:{}", row.doc_id)),
        InlineButton::new("❌ Отклонить", format!("wo:reject:{}", row.doc_id)),
    ]);
    Markup::Inline(rows)
}

pub fn items_of(items: &Value) -> Vec<DocItem> {
    items
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn on_callback(
    deps: &Arc<FlowDeps>,
    admin: i64,
    chat: i64,
    message_id: i64,
    action: &str,
    arg: &str,
) -> Result<()> {
    match action {
        "approve" => approve(deps, admin, chat, arg).await,
        "reject" => reject(deps, admin, chat, arg).await,
        "edit" => edit(deps, admin, chat, message_id, arg).await,
        "unlock" => unlock(deps, admin, chat, message_id, arg).await,
        "adj" => adjust(deps, admin, chat, message_id, arg).await,
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Approve
// ---------------------------------------------------------------------------

async fn approve(deps: &Arc<FlowDeps>, admin: i64, chat: i64, doc_id: &str) -> Result<()> {
    // An edit session already holds the lock for this admin; approving
    // from the edit card skips the CAS. A plain approve must win it.
    let holds_lock = editing_doc(deps, admin).await?.as_deref() == Some(doc_id);
    if !holds_lock && !try_lock_pending_writeoff(&deps.pool, doc_id).await? {
        deps.notify(chat, MSG_ANOTHER_ADMIN).await;
        return Ok(());
    }

    let Some(row) = load_pending_writeoff(&deps.pool, doc_id).await? else {
        // Already settled (or swept); nothing to do.
        deps.notify(chat, &user_error("Акт уже обработан")).await;
        return Ok(());
    };

    let doc = WriteoffDoc {
        doc_uuid: row.doc_uuid,
        store_id: row.store_id,
        account_id: row.account_id,
        comment: format!("{} (Автор: {})", row.reason, row.author_name),
        items: items_of(&row.items),
    };

    let date = deps.clock.today();
    let sent = retry_with_backoff("writeoff submit", &APPROVE_BACKOFF, || async {
        deps.pos.send_writeoff(&doc, date).await
    })
    .await;

    if let Err(e) = sent {
        warn!(doc_id, error = %e, "writeoff submit failed");
        release_writeoff_lock(&deps.pool, doc_id).await?;
        deps.notify(chat, &user_error("Не удалось провести акт, попробуйте позже")).await;
        return Ok(());
    }

    insert_writeoff_history(
        &deps.pool,
        row.doc_uuid,
        row.author_chat_id,
        &row.author_name,
        &row.store_name,
        &row.account_name,
        &row.reason,
        &row.items,
        deps.clock.now_utc(),
        &admin.to_string(),
    )
    .await?;
    prune_writeoff_history(&deps.pool, row.author_chat_id).await?;

    delete_pending_writeoff(&deps.pool, doc_id).await?;
    clear_editing(deps, admin).await?;
    remove_admin_keyboards(deps, &row).await;

    deps.notify(
        row.author_chat_id,
        &format!("✅ Акт №{doc_id} проведён администратором."),
    )
    .await;
    deps.notify(chat, &format!("✅ Акт №{doc_id} проведён.")).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Reject
// ---------------------------------------------------------------------------

async fn reject(deps: &Arc<FlowDeps>, admin: i64, chat: i64, doc_id: &str) -> Result<()> {
    let holds_lock = editing_doc(deps, admin).await?.as_deref() == Some(doc_id);
    if !holds_lock && !try_lock_pending_writeoff(&deps.pool, doc_id).await? {
        deps.notify(chat, MSG_ANOTHER_ADMIN).await;
        return Ok(());
    }

    let Some(row) = load_pending_writeoff(&deps.pool, doc_id).await? else {
        deps.notify(chat, &user_error("Акт уже обработан")).await;
        return Ok(());
    };

    delete_pending_writeoff(&deps.pool, doc_id).await?;
    clear_editing(deps, admin).await?;
    remove_admin_keyboards(deps, &row).await;

    deps.notify(
        row.author_chat_id,
        &format!("❌ Акт №{doc_id} отклонён администратором."),
    )
    .await;
    deps.notify(chat, &format!("Акт №{doc_id} отклонён.")).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Edit (lock held while the admin adjusts quantities)
// ---------------------------------------------------------------------------

async fn edit(
    deps: &Arc<FlowDeps>,
    admin: i64,
    chat: i64,
    message_id: i64,
    doc_id: &str,
) -> Result<()> {
    if !try_lock_pending_writeoff(&deps.pool, doc_id).await? {
        deps.notify(chat, MSG_ANOTHER_ADMIN).await;
        return Ok(());
    }

    let Some(row) = load_pending_writeoff(&deps.pool, doc_id).await? else {
        deps.notify(chat, &user_error("Акт уже обработан")).await;
        return Ok(());
    };

    set_editing(deps, admin, doc_id).await?;
    deps.transport
        .edit_message(chat, message_id, &review_card(&row), Some(edit_markup(&row)))
        .await?;
    Ok(())
}

async fn unlock(
    deps: &Arc<FlowDeps>,
    admin: i64,
    chat: i64,
    message_id: i64,
    doc_id: &str,
) -> Result<()> {
    release_writeoff_lock(&deps.pool, doc_id).await?;
    clear_editing(deps, admin).await?;

    if let Some(row) = load_pending_writeoff(&deps.pool, doc_id).await? {
        deps.transport
            .edit_message(chat, message_id, &review_card(&row), Some(review_markup(doc_id)))
            .await?;
    }
    Ok(())
}

/// `arg` is `{doc_id}:{index}:{p|m}`. Only the admin whose edit session
/// holds the document lock may adjust it.
async fn adjust(
    deps: &Arc<FlowDeps>,
    admin: i64,
    chat: i64,
    message_id: i64,
    arg: &str,
) -> Result<()> {
    let mut parts = arg.splitn(3, ':');
    let (Some(doc_id), Some(idx), Some(dir)) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(());
    };
    let Ok(idx) = idx.parse::<usize>() else { return Ok(()) };

    if editing_doc(deps, admin).await?.as_deref() != Some(doc_id) {
        deps.notify(chat, MSG_ANOTHER_ADMIN).await;
        return Ok(());
    }

    let Some(row) = load_pending_writeoff(&deps.pool, doc_id).await? else {
        return Ok(());
    };

    let mut items = items_of(&row.items);
    let Some(item) = items.get_mut(idx) else { return Ok(()) };

    let step = Decimal::ONE;
    item.quantity = if dir == "p" {
        item.quantity + step
    } else {
        (item.quantity - step).max(Decimal::ONE)
    };

    let items_json = serde_json::to_value(&items)?;
    update_pending_writeoff_items(&deps.pool, doc_id, &items_json).await?;

    let mut updated = row;
    updated.items = items_json;
    deps.transport
        .edit_message(chat, message_id, &review_card(&updated), Some(edit_markup(&updated)))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Which document this admin is currently editing (lock bookkeeping for
/// the approve-from-edit path), kept in FSM data.
async fn editing_doc(deps: &FlowDeps, admin: i64) -> Result<Option<String>> {
    Ok(deps
        .fsm
        .get(admin, "editing_writeoff")
        .await?
        .and_then(|v| v.as_str().map(|s| s.to_string())))
}

async fn set_editing(deps: &FlowDeps, admin: i64, doc_id: &str) -> Result<()> {
    deps.fsm
        .put(admin, "editing_writeoff", Value::String(doc_id.to_string()))
        .await
}

async fn clear_editing(deps: &FlowDeps, admin: i64) -> Result<()> {
    deps.fsm.put(admin, "editing_writeoff", Value::Null).await
}

/// Strip the inline keyboard from every admin's review card.
async fn remove_admin_keyboards(deps: &FlowDeps, row: &PendingWriteoffRow) {
    let Some(map) = row.admin_msg_ids.as_object() else {
        return;
    };
    for (admin, msg) in map {
        let (Ok(admin_chat), Some(message_id)) = (admin.parse::<i64>(), msg.as_i64()) else {
            continue;
        };
        if let Err(e) = deps
            .transport
            .edit_reply_markup(admin_chat, message_id, None)
            .await
        {
            tracing::debug!(admin_chat, message_id, error = %e, "keyboard removal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> PendingWriteoffRow {
        PendingWriteoffRow {
            doc_id: "a1b2c3d4".to_string(),
            doc_uuid: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            author_chat_id: 777,
            author_name: "Иванов Иван".to_string(),
            store_id: Uuid::new_v4(),
            store_name: "Бар (Центр)".to_string(),
            account_id: Uuid::new_v4(),
            account_name: "Списание бар".to_string(),
            reason: "Бой".to_string(),
            department_id: None,
            items: json!([{
                "product_id": "33333333-3333-3333-3333-333333333333",
                "product_name": "Бокал",
                "quantity": "2",
                "measure_unit": "шт"
            }]),
            admin_msg_ids: json!({"100": 5, "101": 6}),
            is_locked: false,
        }
    }

    #[test]
    fn review_card_names_author_and_items() {
        let card = review_card(&sample_row());
        assert!(card.contains("Акт №a1b2c3d4"));
        assert!(card.contains("Иванов Иван"));
        assert!(card.contains("Бокал — 2 шт"));
    }

    #[test]
    fn review_markup_targets_doc() {
        match review_markup("a1b2c3d4") {
            Markup::Inline(rows) => {
                assert_eq!(rows[0].len(), 3);
                assert_eq!(rows[0][0].callback_data, "wo:approve:a1b2c3d4");
                assert_eq!(rows[0][2].callback_data, "wo:reject:a1b2c3d4");
            }
            _ => panic!("expected inline markup"),
        }
    }

    #[test]
    fn malformed_item_entries_are_skipped() {
        let items = json!([{"product_name": "нет id"}, {
            "product_id": "33333333-3333-3333-3333-333333333333",
            "product_name": "Бокал",
            "quantity": "1"
        }]);
        assert_eq!(items_of(&items).len(), 1);
    }
}
