//! Finance reference reconcilers: thirteen structurally identical mirrors.
//!
//! The client's four-permit semaphore is the concurrency cap; all thirteen
//! reconcilers launch together and queue on it.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use sqlx::PgPool;

use galley_clients::FinanceApi;
use galley_config::ProjectClock;
use galley_db::{DbValue, UpsertSpec};
use galley_schemas::{FinanceResource, SyncTrigger};

use crate::engine::{reconcile, MappedRow, RowKey};
use crate::locks::SyncLocks;
use crate::raw::{get_i64, get_str_any};
use crate::SyncOutcome;

const FIN_COLUMNS: &[&str] = &["id", "name", "payload", "synced_at"];

fn fin_spec(resource: FinanceResource) -> UpsertSpec {
    UpsertSpec {
        table: resource.table(),
        columns: FIN_COLUMNS,
        conflict: &["id"],
    }
}

pub fn map_finance(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_i64(v, "id")?;
    let name = get_str_any(v, &["name", "title"]).unwrap_or_default();
    Some((
        vec![
            DbValue::I64(id),
            DbValue::Str(name),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::I64(id),
    ))
}

pub struct FinanceSyncDeps {
    pub pool: PgPool,
    pub clock: ProjectClock,
    pub locks: Arc<SyncLocks>,
    pub fin: Arc<dyn FinanceApi>,
}

pub async fn sync_finance_resource(
    deps: &FinanceSyncDeps,
    resource: FinanceResource,
    trigger: SyncTrigger,
) -> Result<SyncOutcome> {
    let now = deps.clock.now_utc();
    let spec = fin_spec(resource);
    reconcile(
        &deps.pool,
        &deps.clock,
        &deps.locks,
        trigger,
        resource.table(),
        &spec,
        None,
        || async { deps.fin.fetch(resource).await },
        |v| map_finance(v, now),
    )
    .await
}

/// All thirteen finance mirrors, concurrently, outcomes per resource.
pub async fn sync_all_finance(
    deps: &FinanceSyncDeps,
    trigger: SyncTrigger,
) -> Vec<(&'static str, Result<SyncOutcome>)> {
    let futs = FinanceResource::ALL
        .iter()
        .map(|r| sync_finance_resource(deps, *r, trigger));
    let results = join_all(futs).await;

    FinanceResource::ALL
        .iter()
        .map(|r| r.table())
        .zip(results)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn finance_mapper_accepts_string_and_numeric_ids() {
        let now = Utc::now();
        let (_, k1) = map_finance(&json!({"id": 42, "name": "Аванс"}), now).unwrap();
        let (_, k2) = map_finance(&json!({"id": "43", "title": "Касса"}), now).unwrap();
        assert_eq!(k1, RowKey::I64(42));
        assert_eq!(k2, RowKey::I64(43));
    }

    #[test]
    fn records_without_id_are_dropped_but_nameless_kept() {
        let now = Utc::now();
        assert!(map_finance(&json!({"name": "x"}), now).is_none());
        assert!(map_finance(&json!({"id": 7}), now).is_some());
    }

    #[test]
    fn every_resource_has_a_spec_with_bigint_key() {
        for r in FinanceResource::ALL {
            let spec = fin_spec(r);
            assert_eq!(spec.conflict, &["id"]);
            assert_eq!(spec.columns, FIN_COLUMNS);
        }
    }
}
