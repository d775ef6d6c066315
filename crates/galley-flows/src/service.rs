//! Workflow service: shared dependencies and the update dispatcher.
//!
//! Dispatch order per update: callback acknowledgement first, then
//! cooldown, then navigation escape, then the permission check, then the
//! state/prefix routing. One user's updates arrive serially (transport
//! per-key dispatch), so handlers never race against themselves.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{debug, warn};
use uuid::Uuid;

use galley_cache::{KvStore, SessionCache, TtlCache, LIST_TTL, UNITS_TTL};
use galley_chat::{
    navigation_reset, ChatTransport, CooldownDecision, CooldownLedger, FsmStorage, PermissionRules,
    ThrottledAction, Update, UpdateKind, CANCEL_COMMAND,
};
use galley_clients::{CloudClient, FinanceApi, PosApi};
use galley_config::{Config, ProjectClock};
use galley_db::{employee_context, NamedRef};
use galley_sheets::{PermissionsService, SheetClient};
use galley_sync::SyncLocks;

use crate::menu::{self, is_nav_button, main_menu_markup, user_error};
use crate::ocr::OcrExtractor;
use crate::roles::AdminDirectory;
use crate::{auth, invoice, request, stoplist, syncops, writeoff};

/// Everything the handlers need, shared behind one `Arc`.
pub struct FlowDeps {
    pub pool: PgPool,
    pub clock: ProjectClock,
    pub config: Config,
    pub transport: Arc<dyn ChatTransport>,
    pub fsm: FsmStorage,
    pub rules: PermissionRules,
    pub roles: Arc<AdminDirectory>,
    pub cooldowns: CooldownLedger,
    pub locks: Arc<SyncLocks>,
    pub pos: Arc<dyn PosApi>,
    pub fin: Arc<dyn FinanceApi>,
    pub cloud: Arc<CloudClient>,
    pub sheets: Arc<dyn SheetClient>,
    pub permissions: Arc<PermissionsService>,
    pub ocr: Arc<dyn OcrExtractor>,
    pub kv: Arc<dyn KvStore>,

    // Cache tiers (§ caches): session-lifetime and TTL.
    pub user_ctx: SessionCache<UserCtx>,
    pub stores_by_dept: TtlCache<Vec<CachedRef>>,
    pub writeoff_accounts: TtlCache<Vec<CachedRef>>,
    pub units: TtlCache<Vec<CachedRef>>,
}

/// Serialisable slice of the employee context held in the session cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCtx {
    pub employee_id: Uuid,
    pub name: String,
    pub role_code: Option<String>,
    pub role_name: Option<String>,
    pub department_id: Option<Uuid>,
    pub department_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRef {
    pub id: Uuid,
    pub name: String,
}

impl From<NamedRef> for CachedRef {
    fn from(r: NamedRef) -> Self {
        Self {
            id: r.id,
            name: r.name,
        }
    }
}

impl FlowDeps {
    pub fn caches(kv: &Arc<dyn KvStore>) -> (
        SessionCache<UserCtx>,
        TtlCache<Vec<CachedRef>>,
        TtlCache<Vec<CachedRef>>,
        TtlCache<Vec<CachedRef>>,
    ) {
        (
            SessionCache::new(Arc::clone(kv), "user_ctx"),
            TtlCache::new(Arc::clone(kv), "stores_by_dept", LIST_TTL),
            TtlCache::new(Arc::clone(kv), "writeoff_accounts", LIST_TTL),
            TtlCache::new(Arc::clone(kv), "measure_units", UNITS_TTL),
        )
    }

    /// Cached user context; one joined query per missing key.
    pub async fn user_context(&self, user_id: i64) -> Result<Option<UserCtx>> {
        let key = user_id.to_string();
        if let Some(ctx) = self.user_ctx.get(&key).await? {
            return Ok(Some(ctx));
        }
        let Some(row) = employee_context(&self.pool, user_id).await? else {
            return Ok(None);
        };
        let ctx = UserCtx {
            employee_id: row.employee_id,
            name: row.employee_name,
            role_code: row.role_code,
            role_name: row.role_name,
            department_id: row.department_id,
            department_name: row.department_name,
        };
        self.user_ctx.put(&key, &ctx).await?;
        Ok(Some(ctx))
    }

    /// Fire-and-forget warm-up of the hot caches when a user enters a
    /// document-authoring section.
    pub fn spawn_prewarm(self: &Arc<Self>, user_id: i64) {
        let deps = Arc::clone(self);
        tokio::spawn(async move {
            let stores = async {
                if let Ok(Some(ctx)) = deps.user_context(user_id).await {
                    if let Some(dept) = ctx.department_id {
                        let _ = writeoff::stores_cached(&deps, dept).await;
                    }
                }
            };
            let accounts = async {
                let _ = writeoff::accounts_cached(&deps).await;
            };
            let admins = async {
                let _ = deps.roles.admin_ids().await;
            };
            tokio::join!(stores, accounts, admins);
        });
    }

    pub async fn units_cached(&self) -> Result<Vec<CachedRef>> {
        if let Some(units) = self.units.get("all").await? {
            return Ok(units);
        }
        let units: Vec<CachedRef> = galley_db::measure_units(&self.pool)
            .await?
            .into_iter()
            .map(Into::into)
            .collect();
        self.units.put("all", &units).await?;
        Ok(units)
    }

    /// Products mirrored from XML carry their unit as an entity reference;
    /// resolve it to a display name through the units cache. Plain-text
    /// units pass through unchanged.
    pub async fn measure_unit_name(&self, raw: Option<&str>) -> Result<Option<String>> {
        let Some(raw) = raw else { return Ok(None) };
        if let Ok(id) = raw.parse::<Uuid>() {
            let units = self.units_cached().await?;
            return Ok(units
                .into_iter()
                .find(|u| u.id == id)
                .map(|u| u.name)
                .or_else(|| Some(raw.to_string())));
        }
        Ok(Some(raw.to_string()))
    }

    pub fn pos_sync_deps(&self) -> galley_sync::PosSyncDeps {
        galley_sync::PosSyncDeps {
            pool: self.pool.clone(),
            clock: self.clock,
            locks: Arc::clone(&self.locks),
            pos: Arc::clone(&self.pos),
        }
    }

    pub fn fin_sync_deps(&self) -> galley_sync::FinanceSyncDeps {
        galley_sync::FinanceSyncDeps {
            pool: self.pool.clone(),
            clock: self.clock,
            locks: Arc::clone(&self.locks),
            fin: Arc::clone(&self.fin),
        }
    }

    pub async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.transport.send_message(chat_id, text, None).await {
            warn!(chat_id, error = %e, "notify failed");
        }
    }

    pub async fn show_main_menu(&self, chat_id: i64) -> Result<()> {
        self.transport
            .send_message(chat_id, "Главное меню", Some(main_menu_markup()))
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn handle_update(deps: &Arc<FlowDeps>, update: Update) -> Result<()> {
    match update.kind.clone() {
        UpdateKind::Callback {
            callback_id,
            message_id,
            data,
        } => {
            // Invariant: acknowledge before anything else — spinner off.
            if let Err(e) = deps.transport.answer_callback(&callback_id, None).await {
                debug!(error = %e, "callback ack failed");
            }

            let action = classify_callback(&data);
            if let CooldownDecision::Wait(_) = deps.cooldowns.check(update.user_id, action) {
                return Ok(());
            }

            if !deps
                .rules
                .allows_callback(deps.roles.as_ref(), update.user_id, &data)
                .await?
            {
                deps.notify(update.chat_id, &user_error("Недостаточно прав")).await;
                return Ok(());
            }

            dispatch_callback(deps, &update, message_id, &data).await
        }
        UpdateKind::Text { message_id, text } => {
            let text = text.trim().to_string();

            if text == CANCEL_COMMAND {
                navigation_reset(&deps.fsm, deps.transport.as_ref(), update.user_id, update.chat_id)
                    .await?;
                deps.show_main_menu(update.chat_id).await?;
                return Ok(());
            }

            if text == "/start" {
                return auth::start(deps, update.user_id, update.chat_id).await;
            }

            if is_nav_button(&text) {
                if let CooldownDecision::Wait(_) =
                    deps.cooldowns.check(update.user_id, ThrottledAction::Navigation)
                {
                    return Ok(());
                }
                if deps.fsm.in_session(update.user_id).await? {
                    navigation_reset(
                        &deps.fsm,
                        deps.transport.as_ref(),
                        update.user_id,
                        update.chat_id,
                    )
                    .await?;
                }
                if !deps
                    .rules
                    .allows_text(deps.roles.as_ref(), update.user_id, &text)
                    .await?
                {
                    deps.notify(update.chat_id, &user_error("Недостаточно прав")).await;
                    return Ok(());
                }
                return dispatch_nav(deps, &update, &text).await;
            }

            dispatch_text(deps, &update, message_id, &text).await
        }
        UpdateKind::Photos { message_id, images } => {
            // Photos feed the invoice-intake pipeline; gated like the OCR
            // menu button (admins bypass inside the rules).
            let allowed = deps
                .rules
                .allows_text(deps.roles.as_ref(), update.user_id, menu::BTN_OCR)
                .await?;
            if !allowed {
                deps.notify(update.chat_id, &user_error("Недостаточно прав")).await;
                return Ok(());
            }
            galley_chat::consume_input(deps.transport.as_ref(), update.chat_id, message_id).await;
            crate::ocr::intake_photos(deps, update.chat_id, images).await
        }
    }
}

const ADMIN_OP_PREFIXES: [&str; 5] =
    ["wo:approve:", "wo:reject:", "wo:edit:", "wo:unlock:", "wo:adj:"];

fn classify_callback(data: &str) -> ThrottledAction {
    if ADMIN_OP_PREFIXES.iter().any(|p| data.starts_with(p)) {
        ThrottledAction::AdminOp
    } else if data.starts_with("wo:finish") || data.starts_with("inv:finish") || data.starts_with("req:finish") {
        ThrottledAction::FinalizeWriteoff
    } else if data.starts_with("sync:") {
        ThrottledAction::Sync
    } else {
        ThrottledAction::Navigation
    }
}

async fn dispatch_nav(deps: &Arc<FlowDeps>, update: &Update, text: &str) -> Result<()> {
    let user = update.user_id;
    let chat = update.chat_id;

    match text {
        menu::BTN_WRITEOFF => {
            deps.spawn_prewarm(user);
            writeoff::entry(deps, user, chat).await
        }
        menu::BTN_INVOICE => {
            deps.spawn_prewarm(user);
            invoice::entry(deps, user, chat).await
        }
        menu::BTN_REQUEST => {
            deps.spawn_prewarm(user);
            request::entry(deps, user, chat).await
        }
        menu::BTN_TEMPLATES => invoice::templates_entry(deps, user, chat).await,
        menu::BTN_STOPLIST => stoplist::entry(deps, user, chat).await,
        menu::BTN_MIN_STOCK => stoplist::min_stock_entry(deps, user, chat).await,
        menu::BTN_HISTORY => writeoff::history_entry(deps, user, chat).await,
        menu::BTN_OCR => crate::ocr::entry(deps, user, chat).await,
        menu::BTN_SYNC => syncops::entry(deps, user, chat).await,
        menu::BTN_REPORTS => syncops::report_entry(deps, user, chat).await,
        menu::BTN_SETTINGS | menu::BTN_MAIN_MENU | menu::BTN_BACK => {
            deps.show_main_menu(chat).await
        }
        _ => Ok(()),
    }
}

async fn dispatch_text(
    deps: &Arc<FlowDeps>,
    update: &Update,
    message_id: i64,
    text: &str,
) -> Result<()> {
    let user = update.user_id;
    let chat = update.chat_id;

    let Some(state) = deps.fsm.state(user).await? else {
        // No session and not a button: ignore quietly.
        return Ok(());
    };

    if state.contains(":item") || state.contains(":supplier") {
        if let CooldownDecision::Wait(_) = deps.cooldowns.check(user, ThrottledAction::Search) {
            return Ok(());
        }
    }

    match state.as_str() {
        auth::ST_LAST_NAME => auth::on_last_name(deps, user, chat, message_id, text).await,
        writeoff::ST_REASON => writeoff::on_reason(deps, user, chat, message_id, text).await,
        writeoff::ST_ITEM => writeoff::on_item_search(deps, user, chat, message_id, text).await,
        writeoff::ST_QTY => writeoff::on_quantity(deps, user, chat, message_id, text).await,
        invoice::ST_SUPPLIER => invoice::on_supplier_search(deps, user, chat, message_id, text).await,
        invoice::ST_ITEM => invoice::on_item_search(deps, user, chat, message_id, text).await,
        invoice::ST_QTY => invoice::on_quantity(deps, user, chat, message_id, text).await,
        invoice::ST_TPL_NAME => invoice::on_template_name(deps, user, chat, message_id, text).await,
        request::ST_ITEM => request::on_item_search(deps, user, chat, message_id, text).await,
        request::ST_QTY => request::on_quantity(deps, user, chat, message_id, text).await,
        other => {
            debug!(state = other, "text in unexpected state");
            Ok(())
        }
    }
}

async fn dispatch_callback(
    deps: &Arc<FlowDeps>,
    update: &Update,
    message_id: i64,
    data: &str,
) -> Result<()> {
    let user = update.user_id;
    let chat = update.chat_id;

    if let Some(rest) = data.strip_prefix("auth:") {
        return auth::on_callback(deps, user, chat, rest).await;
    }
    if let Some(rest) = data.strip_prefix("wo:") {
        return writeoff::on_callback(deps, user, chat, message_id, rest).await;
    }
    if let Some(rest) = data.strip_prefix("inv:") {
        return invoice::on_callback(deps, user, chat, rest).await;
    }
    if let Some(rest) = data.strip_prefix("tpl:") {
        return invoice::on_template_callback(deps, user, chat, rest).await;
    }
    if let Some(rest) = data.strip_prefix("req:") {
        return request::on_callback(deps, user, chat, message_id, rest).await;
    }
    if let Some(rest) = data.strip_prefix("sync:") {
        return syncops::on_callback(deps, user, chat, rest).await;
    }
    if let Some(rest) = data.strip_prefix("ocr:") {
        return crate::ocr::on_callback(deps, user, chat, rest).await;
    }

    debug!(data, "unrouted callback");
    Ok(())
}
