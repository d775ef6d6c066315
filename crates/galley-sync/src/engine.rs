//! The generic reconciler.
//!
//! One run: take the entity lock, write a `running` audit row, fetch, map
//! (dropping malformed records), then upsert + mirror-delete + terminal
//! audit update inside a single transaction. On failure the transaction
//! rolls back and a second short transaction records the error; the lock is
//! released either way by the guard.
//!
//! The `running` row is inserted before the main transaction on purpose: a
//! crash mid-run leaves it visible with no `finished_at`, which is exactly
//! the audit signal we want.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use sqlx::PgPool;
use tracing::{info, warn};

use galley_clients::ApiResult;
use galley_config::ProjectClock;
use galley_db::{
    batch_upsert, mirror_delete, sync_log_fail, sync_log_finish, sync_log_start, DbValue, KeySet,
    MirrorScope, UpsertSpec,
};
use galley_schemas::SyncTrigger;

use crate::locks::SyncLocks;

/// Key of one mapped row, matching the table's primary key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowKey {
    Uuid(uuid::Uuid),
    I64(i64),
}

/// A mapped row plus its key; `None` from a mapper drops the raw record.
pub type MappedRow = (Vec<DbValue>, RowKey);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Another run holds this entity's lock.
    AlreadyRunning,
    Success {
        records: i64,
        dropped: usize,
    },
    Failed {
        message: String,
    },
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncOutcome::Success { .. })
    }
}

fn keys_to_keyset(rows: &[MappedRow]) -> KeySet {
    match rows.first() {
        Some((_, RowKey::I64(_))) => KeySet::I64(
            rows.iter()
                .filter_map(|(_, k)| match k {
                    RowKey::I64(v) => Some(*v),
                    _ => None,
                })
                .collect(),
        ),
        _ => KeySet::Uuid(
            rows.iter()
                .filter_map(|(_, k)| match k {
                    RowKey::Uuid(v) => Some(*v),
                    _ => None,
                })
                .collect(),
        ),
    }
}

/// Run one reconcile end to end. `fetch` pulls the raw upstream set;
/// `map` converts one raw record, returning `None` to drop it.
pub async fn reconcile<F, Fut>(
    pool: &PgPool,
    clock: &ProjectClock,
    locks: &Arc<SyncLocks>,
    trigger: SyncTrigger,
    name: &str,
    spec: &UpsertSpec,
    scope: Option<MirrorScope>,
    fetch: F,
    map: impl Fn(&Value) -> Option<MappedRow>,
) -> Result<SyncOutcome>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ApiResult<Vec<Value>>>,
{
    let Some(_guard) = locks.try_acquire(name) else {
        info!(entity = name, "sync already running, skipping");
        return Ok(SyncOutcome::AlreadyRunning);
    };

    let started_at = clock.now_utc();
    let log_id = sync_log_start(pool, name, started_at, trigger).await?;

    let raws = match fetch().await {
        Ok(raws) => raws,
        Err(e) => {
            let msg = e.to_string();
            warn!(entity = name, error = %msg, "sync fetch failed");
            sync_log_fail(pool, log_id, clock.now_utc(), &msg).await?;
            return Ok(SyncOutcome::Failed { message: msg });
        }
    };
    let fetched = raws.len();

    let rows: Vec<MappedRow> = raws.iter().filter_map(&map).collect();
    let dropped = fetched - rows.len();
    if dropped > 0 {
        warn!(entity = name, dropped, "malformed upstream records dropped");
    }

    let keys = keys_to_keyset(&rows);
    let values: Vec<Vec<DbValue>> = rows.into_iter().map(|(v, _)| v).collect();
    let records = values.len() as i64;

    let apply = async {
        let mut tx = pool.begin().await?;
        batch_upsert(&mut *tx, spec, values).await?;
        mirror_delete(&mut *tx, spec.table, spec.conflict[0], &keys, scope.as_ref()).await?;
        sync_log_finish(&mut *tx, log_id, clock.now_utc(), records).await?;
        tx.commit().await?;
        anyhow::Ok(())
    };

    match apply.await {
        Ok(()) => {
            info!(entity = name, records, "sync succeeded");
            Ok(SyncOutcome::Success { records, dropped })
        }
        Err(e) => {
            let msg = format!("{e:#}");
            warn!(entity = name, error = %msg, "sync apply failed");
            sync_log_fail(pool, log_id, clock.now_utc(), &msg).await?;
            Ok(SyncOutcome::Failed { message: msg })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyset_matches_key_flavour() {
        let u = uuid::Uuid::new_v4();
        let rows: Vec<MappedRow> = vec![(vec![], RowKey::Uuid(u))];
        match keys_to_keyset(&rows) {
            KeySet::Uuid(v) => assert_eq!(v, vec![u]),
            _ => panic!("expected uuid keyset"),
        }

        let rows: Vec<MappedRow> = vec![(vec![], RowKey::I64(7)), (vec![], RowKey::I64(8))];
        match keys_to_keyset(&rows) {
            KeySet::I64(v) => assert_eq!(v, vec![7, 8]),
            _ => panic!("expected i64 keyset"),
        }
    }

    #[test]
    fn empty_rows_produce_empty_uuid_keyset() {
        assert!(keys_to_keyset(&[]).is_empty());
    }
}
