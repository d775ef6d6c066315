//! Scheduled jobs: the daily chain, the evening stop-list report, and the
//! pending write-off TTL sweep. The nightly negative transfer lives in
//! `transfer`.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use uuid::Uuid;

use galley_db::{
    all_products, delete_pending_writeoff, expired_pending_writeoffs, replace_min_stock,
};
use galley_schemas::SyncTrigger;
use galley_sheets::{
    export_catalogue, export_permission_matrix, parse_min_stock_records, read_export_groups,
    TAB_MIN_MAX,
};
use galley_sync::{sync_all_entity, sync_all_finance, sync_all_pos, sync_stock_balances};

use crate::menu::permission_rules;
use crate::service::FlowDeps;

/// The 07:00 chain: POS reference → shared entities → finance reference →
/// stock balances → min/max import → catalogue export → permission matrix
/// export. Steps report individually; a failed step never aborts the rest.
pub async fn run_daily_chain(deps: &Arc<FlowDeps>, trigger: SyncTrigger) -> Result<()> {
    info!("daily chain started");
    let mut failed: Vec<String> = Vec::new();

    let pos_deps = deps.pos_sync_deps();
    for (name, outcome) in sync_all_pos(&pos_deps, trigger).await {
        if let Err(e) = outcome {
            warn!(entity = name, error = %e, "daily chain: pos sync errored");
            failed.push(name.to_string());
        }
    }

    if let Err(e) =
        sync_all_entity(&deps.pool, &deps.clock, &deps.locks, &deps.pos, trigger).await
    {
        warn!(error = %e, "daily chain: entity sync errored");
        failed.push("entity".to_string());
    }

    let fin_deps = deps.fin_sync_deps();
    for (name, outcome) in sync_all_finance(&fin_deps, trigger).await {
        if let Err(e) = outcome {
            warn!(entity = name, error = %e, "daily chain: finance sync errored");
            failed.push(name.to_string());
        }
    }

    if let Err(e) =
        sync_stock_balances(&deps.pool, &deps.clock, &deps.locks, &deps.pos, trigger).await
    {
        warn!(error = %e, "daily chain: stock balance sync errored");
        failed.push("stock_balance".to_string());
    }

    if let Err(e) = import_min_stock(deps).await {
        warn!(error = %e, "daily chain: min/max import errored");
        failed.push("min_stock".to_string());
    }

    if let Err(e) = export_product_catalogue(deps).await {
        warn!(error = %e, "daily chain: catalogue export errored");
        failed.push("catalogue_export".to_string());
    }

    if let Err(e) = export_ocr_mapping_base(deps).await {
        warn!(error = %e, "daily chain: mapping export errored");
        failed.push("mapping_export".to_string());
    }

    if let Err(e) = export_permissions(deps).await {
        warn!(error = %e, "daily chain: permission export errored");
        failed.push("permission_export".to_string());
    }

    if !failed.is_empty() {
        let report = format!("⚠️ Синхронизация: сбои в шагах {}", failed.join(", "));
        for admin in deps.roles.admin_ids().await? {
            deps.notify(admin, &report).await;
        }
    }

    info!(failed = failed.len(), "daily chain finished");
    Ok(())
}

/// Pull min/max levels from the spreadsheet into the cache table.
pub async fn import_min_stock(deps: &Arc<FlowDeps>) -> Result<usize> {
    let records = deps.sheets.read_records(TAB_MIN_MAX).await?;
    let rows = parse_min_stock_records(&records);
    let n = replace_min_stock(&deps.pool, &rows).await?;
    info!(rows = n, "min/max levels imported");
    Ok(n)
}

/// Write the product catalogue tab, scoped to the export groups.
pub async fn export_product_catalogue(deps: &Arc<FlowDeps>) -> Result<usize> {
    let roots = read_export_groups(deps.sheets.as_ref()).await?;
    let products = all_products(&deps.pool).await?;

    // Expand the configured roots into the full descendant set.
    let mut in_scope: HashSet<Uuid> = HashSet::new();
    let groups: Vec<(Uuid, Option<Uuid>)> =
        sqlx::query_as("select id, parent_id from product_group")
            .fetch_all(&deps.pool)
            .await?;

    let mut frontier: Vec<Uuid> = roots.clone();
    let mut group_scope: HashSet<Uuid> = roots.into_iter().collect();
    while let Some(current) = frontier.pop() {
        for (id, parent) in &groups {
            if *parent == Some(current) && group_scope.insert(*id) {
                frontier.push(*id);
            }
        }
    }
    for p in &products {
        if p.parent_id.map(|pid| group_scope.contains(&pid)).unwrap_or(false) {
            in_scope.insert(p.id);
        }
    }

    let n = export_catalogue(deps.sheets.as_ref(), &products, &in_scope).await?;
    info!(rows = n, "catalogue exported");
    Ok(n)
}

/// Refresh the OCR mapping base: the name→product reference the intake
/// pipeline matches recognised lines against. Ids are kept but hidden.
pub async fn export_ocr_mapping_base(deps: &Arc<FlowDeps>) -> Result<usize> {
    let products = all_products(&deps.pool).await?;

    let header = vec![
        "product_id".to_string(),
        "Наименование".to_string(),
        "Ед. изм.".to_string(),
    ];
    let rows: Vec<Vec<String>> = products
        .iter()
        .filter(|p| !p.deleted)
        .map(|p| {
            vec![
                p.id.to_string(),
                p.name.clone(),
                p.measure_unit.clone().unwrap_or_default(),
            ]
        })
        .collect();

    deps.sheets
        .write_records(galley_sheets::TAB_OCR_MAPPING, &header, &rows)
        .await?;
    deps.sheets
        .hide_column(galley_sheets::TAB_OCR_MAPPING, "product_id")
        .await?;

    info!(rows = rows.len(), "ocr mapping base exported");
    Ok(rows.len())
}

/// Rewrite the permission matrix with a column per registered capability
/// token, then invalidate the cached role sets.
pub async fn export_permissions(deps: &Arc<FlowDeps>) -> Result<()> {
    let matrix = deps.permissions.matrix().await?;
    let mut capabilities = permission_rules().capability_tokens();
    for role_cap in [crate::roles::CAP_ADMIN, crate::roles::CAP_RECEIVER] {
        if !capabilities.contains(&role_cap) {
            capabilities.push(role_cap);
        }
    }

    let user_ids: Vec<i64> =
        sqlx::query_as::<_, (Option<i64>,)>("select chat_user_id from employee where chat_user_id is not null order by chat_user_id")
            .fetch_all(&deps.pool)
            .await?
            .into_iter()
            .filter_map(|(v,)| v)
            .collect();

    export_permission_matrix(deps.sheets.as_ref(), &capabilities, &matrix, &user_ids).await?;
    deps.roles.invalidate().await?;
    info!(users = user_ids.len(), "permission matrix exported");
    Ok(())
}

/// The 22:00 report: per-product time in stop today, fanned out to every
/// admin.
pub async fn run_evening_stoplist_report(deps: &Arc<FlowDeps>) -> Result<()> {
    let tz = deps.clock.tz();
    let midnight = galley_config::local_midnight_utc(tz, deps.clock.today())?;
    let now = deps.clock.now_utc();

    let rows = galley_db::stoplist_time_in_stop(&deps.pool, midnight, now).await?;

    let mut out = String::from("🌆 Стоп-лист за день:\n");
    if rows.is_empty() {
        out.push_str("Позиции в стоп не попадали.\n");
    }
    for row in rows {
        let hours = row.total_seconds / 3600;
        let minutes = (row.total_seconds % 3600) / 60;
        out.push_str(&format!(
            "• {} — {}ч {}м ({} раз)\n",
            row.product_name, hours, minutes, row.intervals
        ));
    }

    for admin in deps.roles.admin_ids().await? {
        deps.notify(admin, &out).await;
    }
    Ok(())
}

/// Remove pending write-offs past the 24 h TTL, notifying their authors.
pub async fn sweep_expired_writeoffs(deps: &Arc<FlowDeps>) -> Result<usize> {
    let expired = expired_pending_writeoffs(&deps.pool, deps.clock.now_utc()).await?;
    let count = expired.len();

    for row in expired {
        if delete_pending_writeoff(&deps.pool, &row.doc_id).await? {
            deps.notify(
                row.author_chat_id,
                &format!("⌛ Акт №{} не был рассмотрен за сутки и удалён.", row.doc_id),
            )
            .await;
        }
    }

    if count > 0 {
        info!(count, "expired pending write-offs swept");
    }
    Ok(count)
}
