//! Operator-triggered sync and the sync report view.
//!
//! Operator runs compete fairly with the scheduler: both go through the
//! same per-entity locks, so a button press during the daily chain simply
//! reports "already running" for the entities in flight.

use std::sync::Arc;

use anyhow::Result;

use galley_chat::show_prompt;
use galley_db::recent_sync_runs;
use galley_schemas::{SyncStatus, SyncTrigger};
use galley_sync::{sync_all_entity, sync_all_finance, sync_all_pos, sync_stock_balances};

use crate::jobs;
use crate::menu::inline_rows;
use crate::service::FlowDeps;

pub async fn entry(deps: &Arc<FlowDeps>, user: i64, chat: i64) -> Result<()> {
    let buttons = vec![
        ("🔄 Всё".to_string(), "sync:all".to_string()),
        ("🏷 Справочники POS".to_string(), "sync:pos".to_string()),
        ("💰 Финансы".to_string(), "sync:fin".to_string()),
        ("📦 Остатки".to_string(), "sync:stock".to_string()),
    ];
    show_prompt(
        deps.transport.as_ref(),
        &deps.fsm,
        user,
        chat,
        "Что синхронизировать?",
        Some(inline_rows(buttons, 2)),
    )
    .await?;
    Ok(())
}

pub async fn on_callback(deps: &Arc<FlowDeps>, _user: i64, chat: i64, rest: &str) -> Result<()> {
    match rest {
        "all" => {
            deps.notify(chat, "⏳ Полная синхронизация запущена…").await;
            let deps = Arc::clone(deps);
            tokio::spawn(async move {
                if let Err(e) = jobs::run_daily_chain(&deps, SyncTrigger::Operator).await {
                    tracing::warn!(error = %e, "operator full sync failed");
                }
                deps.notify(chat, "✅ Синхронизация завершена. См. 📊 Отчёты.").await;
            });
        }
        "pos" => {
            let pos_deps = deps.pos_sync_deps();
            let outcomes = sync_all_pos(&pos_deps, SyncTrigger::Operator).await;
            deps.notify(chat, &summarize(&outcomes)).await;
            let entity = sync_all_entity(
                &deps.pool,
                &deps.clock,
                &deps.locks,
                &deps.pos,
                SyncTrigger::Operator,
            )
            .await?;
            let ok = entity.iter().filter(|(_, o)| o.is_success()).count();
            deps.notify(chat, &format!("Справочники: {ok}/{} слоёв", entity.len())).await;
        }
        "fin" => {
            let fin_deps = deps.fin_sync_deps();
            let outcomes = sync_all_finance(&fin_deps, SyncTrigger::Operator).await;
            deps.notify(chat, &summarize(&outcomes)).await;
        }
        "stock" => {
            let outcome = sync_stock_balances(
                &deps.pool,
                &deps.clock,
                &deps.locks,
                &deps.pos,
                SyncTrigger::Operator,
            )
            .await?;
            deps.notify(chat, &format!("Остатки: {outcome:?}")).await;
        }
        _ => {}
    }
    Ok(())
}

fn summarize(outcomes: &[(&'static str, Result<galley_sync::SyncOutcome>)]) -> String {
    let mut out = String::from("🔄 Результат:\n");
    for (name, res) in outcomes {
        match res {
            Ok(galley_sync::SyncOutcome::Success { records, .. }) => {
                out.push_str(&format!("✅ {name}: {records}\n"));
            }
            Ok(galley_sync::SyncOutcome::AlreadyRunning) => {
                out.push_str(&format!("⏳ {name}: уже выполняется\n"));
            }
            Ok(galley_sync::SyncOutcome::Failed { message }) => {
                out.push_str(&format!("⚠️ {name}: {message}\n"));
            }
            Err(e) => out.push_str(&format!("⚠️ {name}: {e:#}\n")),
        }
    }
    out
}

pub async fn report_entry(deps: &Arc<FlowDeps>, _user: i64, chat: i64) -> Result<()> {
    let runs = recent_sync_runs(&deps.pool, 15).await?;
    if runs.is_empty() {
        deps.notify(chat, "Журнал синхронизаций пуст.").await;
        return Ok(());
    }

    let mut out = String::from("📊 Последние синхронизации:\n");
    for run in runs {
        let icon = match run.status {
            SyncStatus::Success => "✅",
            SyncStatus::Running => "⏳",
            SyncStatus::Error => "⚠️",
        };
        let local = run.started_at.with_timezone(&deps.clock.tz());
        out.push_str(&format!(
            "{icon} {} {} — {} зап.\n",
            local.format("%d.%m %H:%M"),
            run.entity_type,
            run.records_synced
        ));
    }
    deps.notify(chat, &out).await;
    Ok(())
}
