//! Write-off authoring: store → account → reason → items → quantities,
//! then submission for admin review.
//!
//! The running summary lives in the tracked header message; the prompt is
//! edited in place on every transition. Submission creates the durable
//! pending row and fans the act out to every admin.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use galley_chat::{consume_input, show_header, show_prompt, RoleResolver};
use galley_db::{
    insert_pending_writeoff, search_products_in_groups, stores_for_department, writeoff_accounts,
    PendingWriteoffRow,
};
use galley_schemas::docs::MAX_DOC_ITEMS;

use crate::approval;
use crate::menu::{inline_rows, user_error};
use crate::service::{CachedRef, FlowDeps};

pub const ST_STORE: &str = "writeoff:store";
pub const ST_ACCOUNT: &str = "writeoff:account";
pub const ST_REASON: &str = "writeoff:reason";
pub const ST_ITEM: &str = "writeoff:item";
pub const ST_QTY: &str = "writeoff:qty";

const DRAFT_KEY: &str = "wo_draft";
const PAGE_SIZE: usize = 10;

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub measure_unit: Option<String>,
    pub quantity: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteoffDraft {
    pub store_id: Option<Uuid>,
    pub store_name: String,
    pub account_id: Option<Uuid>,
    pub account_name: String,
    pub reason: String,
    pub items: Vec<DraftItem>,
    /// Item picked but awaiting its quantity.
    pub pending_item: Option<DraftItem>,
}

impl WriteoffDraft {
    pub fn summary(&self) -> String {
        let mut out = String::from("📝 Акт списания\n");
        if !self.store_name.is_empty() {
            out.push_str(&format!("Склад: {}\n", self.store_name));
        }
        if !self.account_name.is_empty() {
            out.push_str(&format!("Счёт: {}\n", self.account_name));
        }
        if !self.reason.is_empty() {
            out.push_str(&format!("Причина: {}\n", self.reason));
        }
        for (i, item) in self.items.iter().enumerate() {
            let qty = item
                .quantity
                .map(|q| q.normalize().to_string())
                .unwrap_or_default();
            let unit = item.measure_unit.clone().unwrap_or_default();
            out.push_str(&format!("{}. {} — {} {}\n", i + 1, item.product_name, qty, unit));
        }
        out
    }
}

async fn load_draft(deps: &FlowDeps, user: i64) -> Result<WriteoffDraft> {
    Ok(deps
        .fsm
        .get(user, DRAFT_KEY)
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

async fn store_draft(deps: &FlowDeps, user: i64, draft: &WriteoffDraft) -> Result<()> {
    deps.fsm
        .put(user, DRAFT_KEY, serde_json::to_value(draft)?)
        .await
}

// ---------------------------------------------------------------------------
// Store selection policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSegment {
    Bar,
    Kitchen,
    Manual,
}

const BAR_ROLES: &[&str] = &["бармен", "кассир", "раннер"];
const KITCHEN_ROLES: &[&str] = &[
    "повар",
    "су-шеф",
    "шеф",
    "кондитер",
    "пекарь",
    "посудомой",
];

/// Classify an employee's role into the store segment their write-offs
/// default to. Unrecognised roles select manually, like admins.
pub fn classify_role(role: Option<&str>) -> StoreSegment {
    let Some(role) = role else {
        return StoreSegment::Manual;
    };
    let lower = role.to_lowercase();
    if BAR_ROLES.iter().any(|r| lower.contains(r)) {
        return StoreSegment::Bar;
    }
    if KITCHEN_ROLES.iter().any(|r| lower.contains(r)) {
        return StoreSegment::Kitchen;
    }
    StoreSegment::Manual
}

pub fn segment_store<'a>(stores: &'a [CachedRef], segment: StoreSegment) -> Option<&'a CachedRef> {
    let prefix = match segment {
        StoreSegment::Bar => "Бар",
        StoreSegment::Kitchen => "Кухня",
        StoreSegment::Manual => return None,
    };
    stores.iter().find(|s| s.name.starts_with(prefix))
}

/// Segment filter over the write-off accounts: bar staff see bar accounts,
/// kitchen staff kitchen ones, manual pickers see everything.
pub fn filter_accounts(accounts: &[CachedRef], segment: StoreSegment) -> Vec<CachedRef> {
    let needle = match segment {
        StoreSegment::Bar => "бар",
        StoreSegment::Kitchen => "кухн",
        StoreSegment::Manual => return accounts.to_vec(),
    };
    accounts
        .iter()
        .filter(|a| a.name.to_lowercase().contains(needle))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Cached reference loads
// ---------------------------------------------------------------------------

pub async fn stores_cached(deps: &FlowDeps, department_id: Uuid) -> Result<Vec<CachedRef>> {
    let key = department_id.to_string();
    if let Some(stores) = deps.stores_by_dept.get(&key).await? {
        return Ok(stores);
    }
    let stores: Vec<CachedRef> = stores_for_department(&deps.pool, department_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    deps.stores_by_dept.put(&key, &stores).await?;
    Ok(stores)
}

pub async fn accounts_cached(deps: &FlowDeps) -> Result<Vec<CachedRef>> {
    if let Some(accounts) = deps.writeoff_accounts.get("all").await? {
        return Ok(accounts);
    }
    let accounts: Vec<CachedRef> = writeoff_accounts(&deps.pool)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    deps.writeoff_accounts.put("all", &accounts).await?;
    Ok(accounts)
}

// ---------------------------------------------------------------------------
// Authoring flow
// ---------------------------------------------------------------------------

pub async fn entry(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let Some(ctx) = deps.user_context(user).await? else {
        deps.notify(chat, &user_error("Сначала авторизуйтесь: /start")).await;
        return Ok(());
    };
    let Some(department_id) = ctx.department_id else {
        deps.notify(chat, &user_error("Сначала выберите ресторан: /start")).await;
        return Ok(());
    };

    let stores = stores_cached(deps, department_id).await?;
    let is_admin = deps.roles.is_admin(user).await?;
    let segment = if is_admin {
        StoreSegment::Manual
    } else {
        classify_role(ctx.role_name.as_deref().or(ctx.role_code.as_deref()))
    };

    let mut draft = WriteoffDraft::default();

    if let Some(store) = segment_store(&stores, segment) {
        draft.store_id = Some(store.id);
        draft.store_name = store.name.clone();
        store_draft(deps, user, &draft).await?;
        deps.fsm.set_state(user, ST_ACCOUNT).await?;
        return prompt_accounts(deps, user, chat, segment, 0).await;
    }

    store_draft(deps, user, &draft).await?;
    deps.fsm.set_state(user, ST_STORE).await?;

    let buttons = stores
        .into_iter()
        .map(|s| (s.name, format!("wo:store:{}", s.id)))
        .collect();
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Выберите склад:",
        Some(inline_rows(buttons, 1)),
    )
    .await?;
    Ok(())
}

async fn prompt_accounts(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    segment: StoreSegment,
    page: usize,
) -> Result<()> {
    let accounts = filter_accounts(&accounts_cached(deps).await?, segment);

    let total_pages = accounts.len().div_ceil(PAGE_SIZE).max(1);
    let page = page.min(total_pages - 1);
    let slice = &accounts[page * PAGE_SIZE..(page * PAGE_SIZE + PAGE_SIZE).min(accounts.len())];

    let mut buttons: Vec<(String, String)> = slice
        .iter()
        .map(|a| (a.name.clone(), format!("wo:acct:{}", a.id)))
        .collect();
    if accounts.len() > PAGE_SIZE {
        if page > 0 {
            buttons.push(("⬅️".to_string(), format!("wo:acct_page:{}", page - 1)));
        }
        if page + 1 < total_pages {
            buttons.push(("➡️".to_string(), format!("wo:acct_page:{}", page + 1)));
        }
    }

    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Выберите счёт списания:",
        Some(inline_rows(buttons, 1)),
    )
    .await?;
    Ok(())
}

pub async fn on_callback(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    rest: &str,
) -> Result<()> {
    // Admin-side review callbacks are handled by the approval module.
    for admin_prefix in ["approve:", "reject:", "edit:", "unlock:", "adj:"] {
        if let Some(arg) = rest.strip_prefix(admin_prefix) {
            return approval::on_callback(
                deps,
                user,
                chat,
                message_id,
                admin_prefix.trim_end_matches(':'),
                arg,
            )
            .await;
        }
    }

    if let Some(raw) = rest.strip_prefix("store:") {
        let Ok(store_id) = raw.parse::<Uuid>() else { return Ok(()) };
        let ctx = deps.user_context(user).await?;
        let dept = ctx.and_then(|c| c.department_id);
        let store_name = match dept {
            Some(d) => stores_cached(deps, d)
                .await?
                .into_iter()
                .find(|s| s.id == store_id)
                .map(|s| s.name)
                .unwrap_or_default(),
            None => String::new(),
        };

        let mut draft = load_draft(deps, user).await?;
        draft.store_id = Some(store_id);
        draft.store_name = store_name;
        store_draft(deps, user, &draft).await?;
        deps.fsm.set_state(user, ST_ACCOUNT).await?;
        return prompt_accounts(deps, user, chat, StoreSegment::Manual, 0).await;
    }

    if let Some(raw) = rest.strip_prefix("acct_page:") {
        let page: usize = raw.parse().unwrap_or(0);
        let draft = load_draft(deps, user).await?;
        let segment = segment_of_store(&draft.store_name);
        return prompt_accounts(deps, user, chat, segment, page).await;
    }

    if let Some(raw) = rest.strip_prefix("acct:") {
        let Ok(account_id) = raw.parse::<Uuid>() else { return Ok(()) };
        let account_name = accounts_cached(deps)
            .await?
            .into_iter()
            .find(|a| a.id == account_id)
            .map(|a| a.name)
            .unwrap_or_default();

        let mut draft = load_draft(deps, user).await?;
        draft.account_id = Some(account_id);
        draft.account_name = account_name;
        store_draft(deps, user, &draft).await?;

        deps.fsm.set_state(user, ST_REASON).await?;
        show_header(deps.transport.as_ref(), &deps.fsm, user, chat, &draft.summary()).await?;
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            "Укажите причину списания:",
            None,
        )
        .await?;
        return Ok(());
    }

    if let Some(raw) = rest.strip_prefix("pick:") {
        let Ok(product_id) = raw.parse::<Uuid>() else { return Ok(()) };
        return on_product_pick(deps, user, chat, product_id).await;
    }

    if rest == "finish" {
        return finish(deps, user, chat).await;
    }

    Ok(())
}

fn segment_of_store(store_name: &str) -> StoreSegment {
    if store_name.starts_with("Бар") {
        StoreSegment::Bar
    } else if store_name.starts_with("Кухня") {
        StoreSegment::Kitchen
    } else {
        StoreSegment::Manual
    }
}

pub async fn on_reason(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    consume_input(deps.transport.as_ref(), chat, message_id).await;

    if text.trim().is_empty() {
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            &user_error("Причина не может быть пустой. Укажите причину:"),
            None,
        )
        .await?;
        return Ok(());
    }

    let mut draft = load_draft(deps, user).await?;
    draft.reason = text.trim().to_string();
    store_draft(deps, user, &draft).await?;

    deps.fsm.set_state(user, ST_ITEM).await?;
    show_header(deps.transport.as_ref(), &deps.fsm, user, chat, &draft.summary()).await?;
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Введите название товара для поиска:",
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
        .map(|p| (p.name.clone(), format!("wo:pick:{}", p.id)))
        .collect();
    buttons.push(("✅ Завершить".to_string(), "wo:finish".to_string()));

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

async fn on_product_pick(deps: &Arc<FlowDeps>, user: i64, chat: i64, product_id: Uuid) -> Result<()> {
    let mut draft = load_draft(deps, user).await?;
    if draft.items.len() >= MAX_DOC_ITEMS {
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            &user_error("Достигнут предел позиций в акте."),
            None,
        )
        .await?;
        return Ok(());
    }

    let Some(product) = galley_db::product_by_id(&deps.pool, product_id).await? else {
        return Ok(());
    };

    let unit_name = deps
        .measure_unit_name(product.measure_unit.as_deref())
        .await?;
    draft.pending_item = Some(DraftItem {
        product_id: product.id,
        product_name: product.name.clone(),
        measure_unit: unit_name.clone(),
        quantity: None,
    });
    store_draft(deps, user, &draft).await?;

    deps.fsm.set_state(user, ST_QTY).await?;
    let unit = unit_name.unwrap_or_else(|| "шт".to_string());
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        &format!("Введите количество ({unit}):"),
        None,
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
    let Some(mut item) = draft.pending_item.take() else {
        return Ok(());
    };
    item.quantity = Some(quantity);
    draft.items.push(item);
    store_draft(deps, user, &draft).await?;

    deps.fsm.set_state(user, ST_ITEM).await?;
    show_header(deps.transport.as_ref(), &deps.fsm, user, chat, &draft.summary()).await?;

    let buttons = vec![("✅ Завершить".to_string(), "wo:finish".to_string())];
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Добавьте ещё товар (введите название) или завершите акт:",
        Some(inline_rows(buttons, 1)),
    )
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

async fn finish(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let draft = load_draft(deps, user).await?;

    let (Some(store_id), Some(account_id)) = (draft.store_id, draft.account_id) else {
        deps.notify(chat, &user_error("Акт не заполнен до конца")).await;
        return Ok(());
    };
    if draft.items.is_empty() {
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            &user_error("В акте нет позиций. Добавьте хотя бы один товар:"),
            None,
        )
        .await?;
        return Ok(());
    }

    let ctx = deps.user_context(user).await?;
    let author_name = ctx.as_ref().map(|c| c.name.clone()).unwrap_or_default();
    let department_id = ctx.and_then(|c| c.department_id);

    let doc_uuid = Uuid::new_v4();
    let doc_id = short_doc_id(doc_uuid);

    let items = serde_json::to_value(
        draft
            .items
            .iter()
            .map(|i| {
                json!({
                    "product_id": i.product_id,
                    "product_name": i.product_name,
                    "quantity": i.quantity,
                    "measure_unit": i.measure_unit,
                })
            })
            .collect::<Vec<_>>(),
    )?;

    let row = PendingWriteoffRow {
        doc_id: doc_id.clone(),
        doc_uuid,
        created_at: deps.clock.now_utc(),
        author_chat_id: chat,
        author_name: author_name.clone(),
        store_id,
        store_name: draft.store_name.clone(),
        account_id,
        account_name: draft.account_name.clone(),
        reason: draft.reason.clone(),
        department_id,
        items,
        admin_msg_ids: json!({}),
        is_locked: false,
    };

    // The durable row exists before any admin sees a button for it.
    insert_pending_writeoff(&deps.pool, &row).await?;

    // Fan the review card out to every admin, collecting message ids so
    // keyboards can be removed when the act settles.
    let admins = deps.roles.admin_ids().await?;
    let card = approval::review_card(&row);
    let markup = approval::review_markup(&doc_id);

    let mut admin_msgs = serde_json::Map::new();
    for admin in admins {
        match deps
            .transport
            .send_message(admin, &card, Some(markup.clone()))
            .await
        {
            Ok(message_id) => {
                admin_msgs.insert(admin.to_string(), json!(message_id));
            }
            Err(e) => tracing::warn!(admin, error = %e, "admin notify failed"),
        }
    }
    galley_db::set_admin_msg_ids(&deps.pool, &doc_id, &serde_json::Value::Object(admin_msgs))
        .await?;

    // Close the authoring window.
    galley_chat::navigation_reset(&deps.fsm, deps.transport.as_ref(), user, chat).await?;
    deps.transport
        .send_message(
            chat,
            &format!("📨 Акт №{doc_id} отправлен на подтверждение администраторам."),
            None,
        )
        .await?;
    deps.show_main_menu(chat).await
}

/// Short id shown in chat; the full UUID stays the POS idempotency key.
pub fn short_doc_id(doc_uuid: Uuid) -> String {
    doc_uuid.simple().to_string()[..8].to_string()
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub async fn history_entry(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let rows = sqlx::query_as::<_, (String, String, chrono::DateTime<chrono::Utc>)>(
        r#"
        select store_name, reason, approved_at
        from writeoff_history
        where author_chat_id = $1
        order by approved_at desc
        limit 10
        "#,
    )
    .bind(chat)
    .fetch_all(&deps.pool)
    .await?;

    if rows.is_empty() {
        deps.notify(chat, "История списаний пуста.").await;
        return Ok(());
    }

    let mut out = String::from("🗂 Последние списания:\n");
    for (store, reason, at) in rows {
        let local = at.with_timezone(&deps.clock.tz());
        out.push_str(&format!("• {} — {} ({})\n", local.format("%d.%m %H:%M"), store, reason));
    }
    deps.notify(chat, &out).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(name: &str) -> CachedRef {
        CachedRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    #[test]
    fn bar_and_kitchen_roles_classify() {
        assert_eq!(classify_role(Some("Бармен")), StoreSegment::Bar);
        assert_eq!(classify_role(Some("Старший бармен")), StoreSegment::Bar);
        assert_eq!(classify_role(Some("Кассир")), StoreSegment::Bar);
        assert_eq!(classify_role(Some("Повар")), StoreSegment::Kitchen);
        assert_eq!(classify_role(Some("Су-шеф")), StoreSegment::Kitchen);
        assert_eq!(classify_role(Some("Посудомойщица")), StoreSegment::Kitchen);
        assert_eq!(classify_role(Some("Менеджер")), StoreSegment::Manual);
        assert_eq!(classify_role(None), StoreSegment::Manual);
    }

    #[test]
    fn segment_store_picks_by_prefix() {
        let stores = vec![store("Кухня (Центр)"), store("Бар (Центр)"), store("Хоз. товары (Центр)")];
        assert_eq!(
            segment_store(&stores, StoreSegment::Bar).unwrap().name,
            "Бар (Центр)"
        );
        assert_eq!(
            segment_store(&stores, StoreSegment::Kitchen).unwrap().name,
            "Кухня (Центр)"
        );
        assert!(segment_store(&stores, StoreSegment::Manual).is_none());
    }

    #[test]
    fn account_filter_by_segment() {
        let accounts = vec![
            store("Списание бар"),
            store("Списание кухня"),
            store("Списание порча бар"),
        ];
        let bar = filter_accounts(&accounts, StoreSegment::Bar);
        assert_eq!(bar.len(), 2);
        let all = filter_accounts(&accounts, StoreSegment::Manual);
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn short_doc_id_is_stable_prefix() {
        let u: Uuid = "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".parse().unwrap();
        assert_eq!(short_doc_id(u), "aaaaaaaa");
    }

    #[test]
    fn summary_lists_items_in_order() {
        let draft = WriteoffDraft {
            store_name: "Бар (Центр)".to_string(),
            account_name: "Списание бар".to_string(),
            reason: "Бой".to_string(),
            items: vec![DraftItem {
                product_id: Uuid::new_v4(),
                product_name: "Бокал".to_string(),
                measure_unit: Some("шт".to_string()),
                quantity: Some(Decimal::from(2)),
            }],
            ..Default::default()
        };
        let s = draft.summary();
        assert!(s.contains("Склад: Бар (Центр)"));
        assert!(s.contains("1. Бокал — 2 шт"));
    }
}
