//! Outgoing invoices: live documents and reusable templates.
//!
//! Same single-window discipline as write-offs: store → supplier search →
//! items (scoped by the export groups) → quantities, then either a POS
//! submission or a named template.

use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use galley_chat::{consume_input, show_busy, show_header, show_prompt};
use galley_db::{
    delete_invoice_template, insert_invoice_template, list_invoice_templates,
    load_invoice_template, search_products_in_groups, search_suppliers,
};
use galley_schemas::docs::MAX_DOC_ITEMS;
use galley_schemas::{DocItem, OutgoingInvoiceDoc};

use crate::menu::{inline_rows, user_error};
use crate::service::FlowDeps;
use crate::writeoff::stores_cached;

pub const ST_STORE: &str = "invoice:store";
pub const ST_SUPPLIER: &str = "invoice:supplier";
pub const ST_ITEM: &str = "invoice:item";
pub const ST_QTY: &str = "invoice:qty";
pub const ST_TPL_NAME: &str = "invoice:template_name";

const DRAFT_KEY: &str = "inv_draft";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceDraft {
    pub store_id: Option<Uuid>,
    pub store_name: String,
    pub supplier_id: Option<Uuid>,
    pub supplier_name: String,
    pub items: Vec<DocItem>,
    pub pending: Option<DocItem>,
}

impl InvoiceDraft {
    fn summary(&self) -> String {
        let mut out = String::from("📦 Расходная накладная\n");
        if !self.store_name.is_empty() {
            out.push_str(&format!("Склад: {}\n", self.store_name));
        }
        if !self.supplier_name.is_empty() {
            out.push_str(&format!("Контрагент: {}\n", self.supplier_name));
        }
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

async fn load_draft(deps: &FlowDeps, user: i64) -> Result<InvoiceDraft> {
    Ok(deps
        .fsm
        .get(user, DRAFT_KEY)
        .await?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

async fn store_draft(deps: &FlowDeps, user: i64, draft: &InvoiceDraft) -> Result<()> {
    deps.fsm
        .put(user, DRAFT_KEY, serde_json::to_value(draft)?)
        .await
}

// ---------------------------------------------------------------------------
// Flow
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

    store_draft(deps, user, &InvoiceDraft::default()).await?;
    deps.fsm.set_state(user, ST_STORE).await?;

    let buttons = stores_cached(deps, department_id)
        .await?
        .into_iter()
        .map(|s| (s.name, format!("inv:store:{}", s.id)))
        .collect();
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Выберите склад отгрузки:",
        Some(inline_rows(buttons, 1)),
    )
    .await?;
    Ok(())
}

pub async fn on_supplier_search(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    consume_input(deps.transport.as_ref(), chat, message_id).await;

    let found = search_suppliers(&deps.pool, text, 10).await?;
    if found.is_empty() {
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            &user_error("Контрагент не найден. Введите название ещё раз:"),
            None,
        )
        .await?;
        return Ok(());
    }

    let buttons = found
        .into_iter()
        .map(|s| (s.name, format!("inv:supp:{}", s.id)))
        .collect();
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Выберите контрагента:",
        Some(inline_rows(buttons, 1)),
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
        .map(|p| (p.name.clone(), format!("inv:pick:{}", p.id)))
        .collect();
    buttons.push(("✅ Завершить".to_string(), "inv:finish".to_string()));

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

    let buttons = vec![
        ("📤 Отправить".to_string(), "inv:finish".to_string()),
        ("💾 Сохранить шаблон".to_string(), "inv:savetpl".to_string()),
    ];
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Добавьте ещё товар или завершите накладную:",
        Some(inline_rows(buttons, 2)),
    )
    .await?;
    Ok(())
}

pub async fn on_template_name(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    consume_input(deps.transport.as_ref(), chat, message_id).await;

    let name = text.trim();
    if name.is_empty() {
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            &user_error("Название шаблона не может быть пустым:"),
            None,
        )
        .await?;
        return Ok(());
    }

    let draft = load_draft(deps, user).await?;
    let (Some(store_id), Some(supplier_id)) = (draft.store_id, draft.supplier_id) else {
        deps.notify(chat, &user_error("Шаблон не заполнен до конца")).await;
        return Ok(());
    };

    insert_invoice_template(
        &deps.pool,
        chat,
        name,
        store_id,
        supplier_id,
        &serde_json::to_value(&draft.items)?,
        deps.clock.now_utc(),
    )
    .await?;

    galley_chat::navigation_reset(&deps.fsm, deps.transport.as_ref(), user, chat).await?;
    deps.notify(chat, &format!("💾 Шаблон «{name}» сохранён.")).await;
    deps.show_main_menu(chat).await
}

pub async fn on_callback(deps: &Arc<FlowDeps>, user: i64, chat: i64, rest: &str) -> Result<()> {
    if let Some(raw) = rest.strip_prefix("store:") {
        let Ok(store_id) = raw.parse::<Uuid>() else { return Ok(()) };
        let ctx = deps.user_context(user).await?;
        let store_name = match ctx.and_then(|c| c.department_id) {
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

        deps.fsm.set_state(user, ST_SUPPLIER).await?;
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            "Введите название контрагента для поиска:",
            None,
        )
        .await?;
        return Ok(());
    }

    if let Some(raw) = rest.strip_prefix("supp:") {
        let Ok(supplier_id) = raw.parse::<Uuid>() else { return Ok(()) };
        let name = galley_db::supplier_by_id(&deps.pool, supplier_id)
            .await?
            .map(|s| s.name)
            .unwrap_or_default();

        let mut draft = load_draft(deps, user).await?;
        draft.supplier_id = Some(supplier_id);
        draft.supplier_name = name;
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
        return Ok(());
    }

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
        let unit_name = deps
            .measure_unit_name(product.measure_unit.as_deref())
            .await?;
        draft.pending = Some(DocItem {
            product_id: product.id,
            product_name: product.name,
            quantity: Decimal::ZERO,
            measure_unit: unit_name,
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

    if rest == "savetpl" {
        deps.fsm.set_state(user, ST_TPL_NAME).await?;
        show_prompt(
            deps.transport.as_ref(),
            &deps.fsm,
            user,
            chat,
            "Введите название шаблона:",
            None,
        )
        .await?;
        return Ok(());
    }

    if rest == "finish" {
        return submit(deps, user, chat).await;
    }

    Ok(())
}

async fn submit(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let draft = load_draft(deps, user).await?;
    let (Some(store_id), Some(supplier_id)) = (draft.store_id, draft.supplier_id) else {
        deps.notify(chat, &user_error("Накладная не заполнена до конца")).await;
        return Ok(());
    };
    if draft.items.is_empty() {
        deps.notify(chat, &user_error("В накладной нет позиций")).await;
        return Ok(());
    }

    let ctx = deps.user_context(user).await?;
    let author = ctx.map(|c| c.name).unwrap_or_default();

    let doc = OutgoingInvoiceDoc {
        doc_uuid: Uuid::new_v4(),
        store_id,
        supplier_id,
        status: "NEW".to_string(),
        comment: format!("Накладная из бота (Автор: {author})"),
        items: draft.items.clone(),
    };

    show_busy(deps.transport.as_ref(), &deps.fsm, user, chat).await?;
    let result = deps.pos.send_outgoing_invoice(&doc, deps.clock.today()).await;

    galley_chat::navigation_reset(&deps.fsm, deps.transport.as_ref(), user, chat).await?;
    match result {
        Ok(()) => deps.notify(chat, "📤 Накладная отправлена в систему учёта.").await,
        Err(e) => {
            tracing::warn!(error = %e, "invoice submit failed");
            deps.notify(chat, &user_error("Не удалось отправить накладную")).await;
        }
    }
    deps.show_main_menu(chat).await
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

pub async fn templates_entry(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let templates = list_invoice_templates(&deps.pool, chat).await?;
    if templates.is_empty() {
        deps.notify(chat, "Шаблонов пока нет.").await;
        return Ok(());
    }

    let mut buttons = Vec::new();
    for t in templates {
        buttons.push((format!("📤 {}", t.name), format!("tpl:use:{}", t.id)));
        buttons.push(("🗑".to_string(), format!("tpl:del:{}", t.id)));
    }
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Ваши шаблоны:",
        Some(inline_rows(buttons, 2)),
    )
    .await?;
    Ok(())
}

pub async fn on_template_callback(
    deps: &Arc<FlowDeps>,
    user: i64,
    chat: i64,
    rest: &str,
) -> Result<()> {
    if let Some(raw) = rest.strip_prefix("use:") {
        let Ok(id) = raw.parse::<i64>() else { return Ok(()) };
        let Some(tpl) = load_invoice_template(&deps.pool, id).await? else {
            deps.notify(chat, &user_error("Шаблон не найден")).await;
            return Ok(());
        };

        let items: Vec<DocItem> = serde_json::from_value(tpl.items.clone()).unwrap_or_default();
        let doc = OutgoingInvoiceDoc {
            doc_uuid: Uuid::new_v4(),
            store_id: tpl.store_id,
            supplier_id: tpl.supplier_id,
            status: "NEW".to_string(),
            comment: format!("Накладная по шаблону «{}»", tpl.name),
            items,
        };

        show_busy(deps.transport.as_ref(), &deps.fsm, user, chat).await?;
        let result = deps.pos.send_outgoing_invoice(&doc, deps.clock.today()).await;
        galley_chat::navigation_reset(&deps.fsm, deps.transport.as_ref(), user, chat).await?;
        match result {
            Ok(()) => {
                deps.notify(chat, &format!("📤 Накладная по шаблону «{}» отправлена.", tpl.name))
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "template invoice submit failed");
                deps.notify(chat, &user_error("Не удалось отправить накладную")).await;
            }
        }
        return Ok(());
    }

    if let Some(raw) = rest.strip_prefix("del:") {
        let Ok(id) = raw.parse::<i64>() else { return Ok(()) };
        if delete_invoice_template(&deps.pool, id, chat).await? {
            deps.notify(chat, "🗑 Шаблон удалён.").await;
        }
        return templates_entry(deps, user, chat).await;
    }

    Ok(())
}
