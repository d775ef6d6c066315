//! Product requests: floor staff compose an item list, receivers approve
//! (emitting an outgoing invoice with status PROCESSED), edit quantities,
//! or cancel.
//!
//! Settlement uses the same single-winner discipline as write-offs, via a
//! conditional update on `status = 'open'`.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use galley_chat::{consume_input, show_header, show_prompt, InlineButton, Markup};
use galley_db::{
    insert_product_request, load_product_request, search_products_in_groups, search_suppliers,
    settle_product_request, store_by_name, update_request_items, ProductRequestRow,
};
use galley_schemas::docs::MAX_DOC_ITEMS;
use galley_schemas::{DocItem, OutgoingInvoiceDoc};

use crate::menu::{inline_rows, user_error};
use crate::service::FlowDeps;

pub const ST_ITEM: &str = "request:item";
pub const ST_QTY: &str = "request:qty";

const DRAFT_KEY: &str = "req_draft";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RequestDraft {
    items: Vec<DocItem>,
    pending: Option<DocItem>,
}

impl RequestDraft {
    fn summary(&self) -> String {
        let mut out = String::from("📝 Заявка на продукты\n");
        for (i, item) in self.items.iter().enumerate() {
            out.push_str(&format!(
                "{}. {} — {}\n",
                i + 1,
                item.product_name,
                item.quantity.normalize()
            ));
        }
        out
    }
}

async fn load_draft(deps: &FlowDeps, user: i64) -> Result<RequestDraft> {
    Ok(deps
        .fsm
        .get(user, DRAFT_KEY)
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

async fn store_draft(deps: &FlowDeps, user: i64, draft: &RequestDraft) -> Result<()> {
    deps.fsm
        .put(user, DRAFT_KEY, serde_json::to_value(draft)?)
        .await
}

// ---------------------------------------------------------------------------
// Authoring
// ---------------------------------------------------------------------------

pub async fn entry(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    if deps.user_context(user).await?.is_none() {
        deps.notify(chat, &user_error("Сначала авторизуйтесь: /start")).await;
        return Ok(());
    }

    store_draft(deps, user, &RequestDraft::default()).await?;
    deps.fsm.set_state(user, ST_ITEM).await?;
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Введите название товара для заявки:",
        None,
    )
    .await?;
    Ok(())
}

pub async fn on_item_search(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    consume_input(deps.transport.as_ref(), chat, message_id).await;

    let roots = galley_sheets::read_export_groups(deps.sheets.as_ref()).await?;
    let found = search_products_in_groups(&deps.pool, text, &roots, 10).await?;
    if found.is_empty() {
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            &user_error("Ничего не найдено. Попробуйте другое название:"),
            None,
        )
        .await?;
        return Ok(());
    }

    let mut buttons: Vec<(String, String)> = found
        .into_iter()
        .map(|p| (p.name.clone(), format!("req:pick:{}", p.id)))
        .collect();
    buttons.push(("✅ Отправить заявку".to_string(), "req:finish".to_string()));

    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Выберите товар:",
        Some(inline_rows(buttons, 1)),
    )
    .await?;
    Ok(())
}

pub async fn on_quantity(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    consume_input(deps.transport.as_ref(), chat, message_id).await;

    let parsed: Option<Decimal> = text.trim().replace(',', ".").parse().ok();
    let quantity = match parsed {
        Some(q) if q > Decimal::ZERO && q <= Decimal::from(100_000) => q,
        _ => {
            show_prompt(
                deps.transport.as_ref(),
                &deps.fsm,
                user,
                chat,
                &user_error("Количество должно быть положительным числом. Введите ещё раз:"),
                None,
            )
            .await?;
            return Ok(());
        }
    };

    let mut draft = load_draft(deps, user).await?;
    let Some(mut item) = draft.pending.take() else { return Ok(()) };
    item.quantity = quantity;
    draft.items.push(item);
    store_draft(deps, user, &draft).await?;

    deps.fsm.set_state(user, ST_ITEM).await?;
    show_header(deps.transport.as_ref(), &deps.fsm, user, chat, &draft.summary()).await?;
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Добавьте ещё товар или отправьте заявку:",
        Some(inline_rows(
            vec![("✅ Отправить заявку".to_string(), "req:finish".to_string())],
            1,
        )),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Callbacks (author + receiver)
// ---------------------------------------------------------------------------

pub async fn on_callback(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    rest: &str,
) -> Result<()> {
    if let Some(raw) = rest.strip_prefix("pick:") {
        let Ok(product_id) = raw.parse::<Uuid>() else { return Ok(()) };
        let Some(product) = galley_db::product_by_id(&deps.pool, product_id).await? else {
            return Ok(());
        };

        let mut draft = load_draft(deps, user).await?;
        if draft.items.len() >= MAX_DOC_ITEMS {
            deps.notify(chat, &user_error("Достигнут предел позиций")).await;
            return Ok(());
        }
        draft.pending = Some(DocItem {
            product_id: product.id,
            product_name: product.name,
            quantity: Decimal::ZERO,
            measure_unit: product.measure_unit,
        });
        store_draft(deps, user, &draft).await?;

        deps.fsm.set_state(user, ST_QTY).await?;
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            "Введите количество:",
            None,
        )
        .await?;
        return Ok(());
    }

    if rest == "finish" {
        return submit(deps, user, chat).await;
    }

    if let Some(raw) = rest.strip_prefix("approve:") {
        if let Ok(id) = raw.parse::<i64>() {
            return approve(deps, chat, id).await;
        }
        return Ok(());
    }
    if let Some(raw) = rest.strip_prefix("cancel:") {
        if let Ok(id) = raw.parse::<i64>() {
            return cancel(deps, chat, id).await;
        }
        return Ok(());
    }
    if let Some(raw) = rest.strip_prefix("adj:") {
        return adjust(deps, chat, message_id, raw).await;
    }
    if let Some(raw) = rest.strip_prefix("edit:") {
        if let Ok(id) = raw.parse::<i64>() {
            if let Some(row) = load_product_request(&deps.pool, id).await? {
                deps.transport
                    .edit_message(chat, message_id, &receiver_card(&row), Some(edit_markup(&row)))
                    .await?;
            }
        }
        return Ok(());
    }

    Ok(())
}

async fn submit(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let draft = load_draft(deps, user).await?;
    if draft.items.is_empty() {
        deps.notify(chat, &user_error("В заявке нет позиций")).await;
        return Ok(());
    }

    let ctx = deps.user_context(user).await?;
    let author_name = ctx.as_ref().map(|c| c.name.clone()).unwrap_or_default();
    let department_id = ctx.and_then(|c| c.department_id);

    let id = insert_product_request(
        &deps.pool,
        deps.clock.now_utc(),
        chat,
        &author_name,
        department_id,
        &serde_json::to_value(&draft.items)?,
        &json!({}),
    )
    .await?;

    let Some(row) = load_product_request(&deps.pool, id).await? else {
        anyhow::bail!("request row {id} vanished right after insert");
    };

    let receivers = deps.roles.receiver_ids().await?;
    let card = receiver_card(&row);
    for receiver in receivers {
        if let Err(e) = deps
            .transport
            .send_message(receiver, &card, Some(receiver_markup(id)))
            .await
        {
            tracing::warn!(receiver, error = %e, "receiver notify failed");
        }
    }

    galley_chat::navigation_reset(&deps.fsm, deps.transport.as_ref(), user, chat).await?;
    deps.notify(chat, &format!("📨 Заявка №{id} отправлена.")).await;
    deps.show_main_menu(chat).await
}

fn receiver_card(row: &ProductRequestRow) -> String {
    let items: Vec<DocItem> = serde_json::from_value(row.items.clone()).unwrap_or_default();
    let mut out = format!("📝 Заявка №{} от {}\n", row.id, row.author_name);
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} — {}\n",
            i + 1,
            item.product_name,
            item.quantity.normalize()
        ));
    }
    out
}

fn receiver_markup(id: i64) -> Markup {
    Markup::Inline(vec![vec![
        InlineButton::new("✅ Оформить", format!("req:approve:{id}")),
        InlineButton::new("✏️ Изменить", format!("req:edit:{id}")),
        InlineButton::new("❌ Отменить", format!("req:cancel:{id}")),
    ]])
}

fn edit_markup(row: &ProductRequestRow) -> Markup {
    let items: Vec<DocItem> = serde_json::from_value(row.items.clone()).unwrap_or_default();
    let mut rows: Vec<Vec<InlineButton>> = Vec::new();
    for (i, item) in items.iter().enumerate() {
        rows.push(vec![
            InlineButton::new(
                format!("➖ {}", item.product_name),
                format!("req:adj:{}:{}:m", row.id, i),
            ),
            InlineButton::new("➕", format!("req:adj:{}:{}:p", row.id, i)),
        ]);
    }
    rows.push(vec![
        InlineButton::new("✅ Оформить", format!("req:approve:{}", row.id)),
        InlineButton::new("❌ Отменить", format!("req:cancel:{}", row.id)),
    ]);
    Markup::Inline(rows)
}

// ---------------------------------------------------------------------------
// Receiver actions
// ---------------------------------------------------------------------------

async fn approve(deps: &Arc<FlowDeps>, chat: i64, id: i64) -> Result<()> {
    let Some(row) = load_product_request(&deps.pool, id).await? else {
        deps.notify(chat, &user_error("Заявка не найдена")).await;
        return Ok(());
    };

    // Resolve the emitting store and the restaurant counteragent from the
    // author's department before claiming the request.
    let Some((store_id, supplier_id)) = resolve_targets(deps, &row).await? else {
        deps.notify(
            chat,
            &user_error("Не удалось определить склад или контрагента для заявки"),
        )
        .await;
        return Ok(());
    };

    if !settle_product_request(&deps.pool, id, "processed").await? {
        deps.notify(chat, "⚠️ Заявку уже обработал другой сотрудник").await;
        return Ok(());
    }

    let items: Vec<DocItem> = serde_json::from_value(row.items.clone()).unwrap_or_default();
    let doc = OutgoingInvoiceDoc {
        doc_uuid: Uuid::new_v4(),
        store_id,
        supplier_id,
        status: "PROCESSED".to_string(),
        comment: format!("Заявка №{} (Автор: {})", row.id, row.author_name),
        items,
    };

    match deps.pos.send_outgoing_invoice(&doc, deps.clock.today()).await {
        Ok(()) => {
            deps.notify(row.author_chat_id, &format!("✅ Заявка №{id} оформлена.")).await;
            deps.notify(chat, &format!("✅ Заявка №{id} оформлена.")).await;
        }
        Err(e) => {
            tracing::warn!(id, error = %e, "request invoice submit failed");
            deps.notify(chat, &user_error("Заявка помечена оформленной, но документ не прошёл"))
                .await;
        }
    }
    Ok(())
}

async fn cancel(deps: &Arc<FlowDeps>, chat: i64, id: i64) -> Result<()> {
    if !settle_product_request(&deps.pool, id, "cancelled").await? {
        deps.notify(chat, "⚠️ Заявку уже обработал другой сотрудник").await;
        return Ok(());
    }
    if let Some(row) = load_product_request(&deps.pool, id).await? {
        deps.notify(row.author_chat_id, &format!("❌ Заявка №{id} отменена.")).await;
    }
    deps.notify(chat, &format!("Заявка №{id} отменена.")).await;
    Ok(())
}

/// `raw` is `{id}:{index}:{p|m}`.
async fn adjust(deps: &Arc<FlowDeps>, chat: i64, message_id: i64, raw: &str) -> Result<()> {
    let mut parts = raw.splitn(3, ':');
    let (Some(id), Some(idx), Some(dir)) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(());
    };
    let (Ok(id), Ok(idx)) = (id.parse::<i64>(), idx.parse::<usize>()) else {
        return Ok(());
    };

    let Some(row) = load_product_request(&deps.pool, id).await? else { return Ok(()) };
    let mut items: Vec<DocItem> = serde_json::from_value(row.items.clone()).unwrap_or_default();
    let Some(item) = items.get_mut(idx) else { return Ok(()) };

    item.quantity = if dir == "p" {
        item.quantity + Decimal::ONE
    } else {
        (item.quantity - Decimal::ONE).max(Decimal::ONE)
    };

    let items_json = serde_json::to_value(&items)?;
    if !update_request_items(&deps.pool, id, &items_json).await? {
        deps.notify(chat, "⚠️ Заявку уже обработал другой сотрудник").await;
        return Ok(());
    }

    let mut updated = row;
    updated.items = items_json;
    deps.transport
        .edit_message(chat, message_id, &receiver_card(&updated), Some(edit_markup(&updated)))
        .await?;
    Ok(())
}

/// Store = the central warehouse of the author's restaurant; counteragent
/// = the supplier row named after the restaurant.
async fn resolve_targets(
    deps: &FlowDeps,
    row: &ProductRequestRow,
) -> Result<Option<(Uuid, Uuid)>> {
    let Some(department_id) = row.department_id else { return Ok(None) };

    let dept_name = galley_db::list_departments(&deps.pool)
        .await?
        .into_iter()
        .find(|d| d.id == department_id)
        .map(|d| d.name);
    let Some(dept_name) = dept_name else { return Ok(None) };

    let store_name = format!("{} ({})", deps.config.transfer_source_prefix, dept_name);
    let Some(store) = store_by_name(&deps.pool, &store_name).await? else {
        return Ok(None);
    };

    let supplier = search_suppliers(&deps.pool, &dept_name, 1).await?.into_iter().next();
    Ok(supplier.map(|s| (store.id, s.id)))
}
