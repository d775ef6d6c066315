//! The shared entity table: sixteen `root_type` slices reconciled under one
//! lock and one transaction.
//!
//! The slices target a single physical table with disjoint scopes, so one
//! commit keeps the table internally consistent: readers see the previous
//! complete snapshot or the new one, never a mix of slices. Each slice
//! still writes its own audit row (inside the shared transaction).

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use galley_clients::PosApi;
use galley_config::ProjectClock;
use galley_db::{
    batch_upsert, mirror_delete, sync_log_fail, sync_log_finish, sync_log_start,
    sync_log_start_tx, DbValue, MirrorScope, UpsertSpec,
};
use galley_schemas::{RootType, SyncTrigger};

use crate::engine::{MappedRow, RowKey, SyncOutcome};
use crate::locks::SyncLocks;
use crate::raw::{get_bool, get_str, get_uuid};

const ENTITY: UpsertSpec = UpsertSpec {
    table: "entity",
    columns: &["id", "root_type", "name", "code", "deleted", "payload", "synced_at"],
    conflict: &["id", "root_type"],
};

const LOCK_NAME: &str = "entity";

pub fn map_entity(v: &Value, root_type: RootType, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::Str(root_type.as_str().to_string()),
            DbValue::Str(get_str(v, "name")?),
            DbValue::OptStr(get_str(v, "code")),
            DbValue::Bool(get_bool(v, "deleted")),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

/// Reconcile every `root_type` slice. Fetches run concurrently; the
/// database work shares one transaction and one commit.
pub async fn sync_all_entity(
    pool: &PgPool,
    clock: &ProjectClock,
    locks: &Arc<SyncLocks>,
    pos: &Arc<dyn PosApi>,
    trigger: SyncTrigger,
) -> Result<Vec<(RootType, SyncOutcome)>> {
    let Some(_guard) = locks.try_acquire(LOCK_NAME) else {
        info!("entity sync already running, skipping");
        return Ok(RootType::ALL
            .iter()
            .map(|rt| (*rt, SyncOutcome::AlreadyRunning))
            .collect());
    };

    // Pull all sixteen slices up front; a slice whose fetch fails gets its
    // own error row and does not block the others.
    let fetches = join_all(
        RootType::ALL
            .iter()
            .map(|rt| async move { (*rt, pos.fetch_entities(*rt).await) }),
    )
    .await;

    let now = clock.now_utc();
    let mut outcomes: Vec<(RootType, SyncOutcome)> = Vec::with_capacity(16);
    let mut slices: Vec<(RootType, Vec<MappedRow>, usize)> = Vec::new();

    for (rt, fetched) in fetches {
        match fetched {
            Ok(raws) => {
                let total = raws.len();
                let rows: Vec<MappedRow> =
                    raws.iter().filter_map(|v| map_entity(v, rt, now)).collect();
                let dropped = total - rows.len();
                if dropped > 0 {
                    warn!(root_type = rt.as_str(), dropped, "malformed entity records dropped");
                }
                slices.push((rt, rows, dropped));
            }
            Err(e) => {
                let msg = e.to_string();
                warn!(root_type = rt.as_str(), error = %msg, "entity slice fetch failed");
                let log_id = sync_log_start(pool, rt.as_str(), now, trigger).await?;
                sync_log_fail(pool, log_id, clock.now_utc(), &msg).await?;
                outcomes.push((rt, SyncOutcome::Failed { message: msg }));
            }
        }
    }

    let apply = async {
        let mut tx = pool.begin().await.context("entity sync begin failed")?;
        let mut applied: Vec<(RootType, SyncOutcome)> = Vec::with_capacity(slices.len());

        for (rt, rows, dropped) in &slices {
            let log_id = sync_log_start_tx(&mut *tx, rt.as_str(), now, trigger).await?;

            let keys = galley_db::KeySet::Uuid(
                rows.iter()
                    .filter_map(|(_, k)| match k {
                        RowKey::Uuid(u) => Some(*u),
                        _ => None,
                    })
                    .collect(),
            );
            let values: Vec<Vec<DbValue>> = rows.iter().map(|(v, _)| v.clone()).collect();
            let records = values.len() as i64;

            batch_upsert(&mut *tx, &ENTITY, values).await?;
            mirror_delete(
                &mut *tx,
                ENTITY.table,
                "id",
                &keys,
                Some(&MirrorScope {
                    column: "root_type",
                    value: rt.as_str().to_string(),
                }),
            )
            .await?;
            sync_log_finish(&mut *tx, log_id, clock.now_utc(), records).await?;

            applied.push((
                *rt,
                SyncOutcome::Success {
                    records,
                    dropped: *dropped,
                },
            ));
        }

        tx.commit().await.context("entity sync commit failed")?;
        anyhow::Ok(applied)
    };

    match apply.await {
        Ok(applied) => outcomes.extend(applied),
        Err(e) => {
            // The shared transaction rolled back; none of the per-slice
            // audit rows survived, so record one summary error row.
            let msg = format!("{e:#}");
            warn!(error = %msg, "entity sync transaction failed");
            let log_id = sync_log_start(pool, LOCK_NAME, now, trigger).await?;
            sync_log_fail(pool, log_id, clock.now_utc(), &msg).await?;
            for (rt, _, _) in &slices {
                outcomes.push((*rt, SyncOutcome::Failed { message: msg.clone() }));
            }
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entity_mapper_stamps_root_type() {
        let now = Utc::now();
        let v = json!({
            "id": "55555555-5555-5555-5555-555555555555",
            "name": "Списание бар",
            "code": "5.01",
            "deleted": false
        });
        let (row, _) = map_entity(&v, RootType::Account, now).unwrap();
        assert_eq!(row.len(), ENTITY.columns.len());
        match &row[1] {
            DbValue::Str(s) => assert_eq!(s, "ACCOUNT"),
            other => panic!("root_type slot holds {other:?}"),
        }
    }

    #[test]
    fn entity_conflict_key_is_composite() {
        assert_eq!(ENTITY.conflict, &["id", "root_type"]);
    }
}
