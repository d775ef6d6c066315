//! Persistence layer: pool tuning, embedded migrations, the batch-upsert and
//! mirror-delete primitives, the sync audit log, and the workflow-table
//! repositories.
//!
//! Everything is a free async function over `&PgPool` (or a transaction);
//! no repository objects. The database sits behind a high-latency link, so
//! the pool validates connections before handing them out and recycles idle
//! sockets before the server drops them.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

pub mod catalog;
pub mod employees;
pub mod minstock;
pub mod misc;
pub mod stock;
pub mod stoplist;
pub mod sync_log;
pub mod templates;
pub mod upsert;
pub mod writeoff;

pub use catalog::{
    all_products, all_stores, list_departments, measure_units, product_by_id,
    search_products_in_groups, search_suppliers, store_by_name, stores_for_department,
    supplier_by_id, writeoff_accounts, NamedRef,
};
pub use employees::{
    bind_chat_user, employee_context, search_employees_by_last_name, set_employee_department,
    EmployeeContext,
};
pub use minstock::{replace_min_stock, stock_below_min, StockShortageRow};
pub use misc::{
    latest_cloud_token, legacy_admin_ids, legacy_receiver_ids, sched_watermark_get,
    sched_watermark_set,
};
pub use stock::{replace_stock_balances, stock_balances_for_store};
pub use stoplist::{
    active_stoplist_pairs, close_stoplist_interval, open_stoplist_interval, pinned_message_get,
    pinned_message_upsert, pinned_messages_all, remove_active_pair, stoplist_time_in_stop,
    upsert_active_pair, PinnedKind, PinnedMessageRow, TimeInStopRow,
};
pub use sync_log::{
    recent_sync_runs, sync_log_fail, sync_log_finish, sync_log_start, sync_log_start_tx,
};
pub use templates::{
    delete_invoice_template, insert_invoice_template, insert_ocr_document, insert_ocr_item,
    insert_product_request, list_invoice_templates, load_invoice_template, load_product_request,
    settle_product_request, update_request_items, InvoiceTemplateRow, OcrDocumentRow,
    ProductRequestRow,
};
pub use upsert::{
    batch_upsert, mirror_delete, DbValue, KeySet, MirrorDeleteOutcome, MirrorScope, UpsertSpec,
};
pub use writeoff::{
    delete_pending_writeoff, expired_pending_writeoffs, insert_pending_writeoff,
    insert_writeoff_history, load_pending_writeoff, prune_writeoff_history, release_writeoff_lock,
    set_admin_msg_ids, try_lock_pending_writeoff, update_pending_writeoff_items, PendingWriteoffRow,
    PENDING_WRITEOFF_TTL_HOURS, WRITEOFF_HISTORY_CAP,
};

/// Rows per UPSERT statement. Round-trip cost to the remote DB dominates, so
/// one 500-row statement replaces 500 single-row round trips.
pub const UPSERT_BATCH_SIZE: usize = 500;

/// Connect using the given URL with the pool discipline this deployment
/// needs: 5 baseline + 5 overflow connections, pre-ping on acquire, and a
/// 300 s idle recycle because the upstream drops idle sockets.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .min_connections(5)
        .max_connections(10)
        .test_before_acquire(true)
        .idle_timeout(Duration::from_secs(300))
        .acquire_timeout(Duration::from_secs(30))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Short OLTP statements; planner JIT only adds latency here.
                sqlx::query("set jit = off").execute(conn).await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity + schema presence, used by `init-schema` verification.
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='sync_log'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok: one == 1,
        has_schema: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_schema: bool,
}
