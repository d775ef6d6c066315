//! Stock-balance reconcile: full replace under the usual lock + audit
//! discipline.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use galley_clients::PosApi;
use galley_config::ProjectClock;
use galley_db::{replace_stock_balances, sync_log_fail, sync_log_finish, sync_log_start};
use galley_schemas::{StockBalanceRow, SyncTrigger};

use crate::locks::SyncLocks;
use crate::raw::{get_decimal, get_uuid};
use crate::SyncOutcome;

const LOCK_NAME: &str = "stock_balance";

/// Map one balance report row, resolving names through the reference
/// mirror. Rows naming unknown stores/products are dropped — the reference
/// sync runs first in the daily chain.
pub fn map_balance(
    v: &Value,
    store_names: &HashMap<Uuid, String>,
    product_names: &HashMap<Uuid, String>,
) -> Option<StockBalanceRow> {
    let store_id = get_uuid(v, "store")?;
    let product_id = get_uuid(v, "product")?;
    Some(StockBalanceRow {
        store_id,
        product_id,
        store_name: store_names.get(&store_id)?.clone(),
        product_name: product_names.get(&product_id)?.clone(),
        amount: get_decimal(v, "amount")?,
        money: get_decimal(v, "sum").unwrap_or_default(),
    })
}

async fn name_map(pool: &PgPool, table: &str) -> Result<HashMap<Uuid, String>> {
    let rows = sqlx::query(&format!("select id, name from {table}"))
        .fetch_all(pool)
        .await
        .with_context(|| format!("name map load from {table} failed"))?;

    let mut map = HashMap::with_capacity(rows.len());
    for row in rows {
        map.insert(row.try_get::<Uuid, _>("id")?, row.try_get::<String, _>("name")?);
    }
    Ok(map)
}

pub async fn sync_stock_balances(
    pool: &PgPool,
    clock: &ProjectClock,
    locks: &Arc<SyncLocks>,
    pos: &Arc<dyn PosApi>,
    trigger: SyncTrigger,
) -> Result<SyncOutcome> {
    let Some(_guard) = locks.try_acquire(LOCK_NAME) else {
        info!("stock balance sync already running, skipping");
        return Ok(SyncOutcome::AlreadyRunning);
    };

    let started_at = clock.now_utc();
    let log_id = sync_log_start(pool, LOCK_NAME, started_at, trigger).await?;

    let raws = match pos.fetch_stock_balances(clock.today()).await {
        Ok(raws) => raws,
        Err(e) => {
            let msg = e.to_string();
            warn!(error = %msg, "stock balance fetch failed");
            sync_log_fail(pool, log_id, clock.now_utc(), &msg).await?;
            return Ok(SyncOutcome::Failed { message: msg });
        }
    };

    let apply = async {
        let store_names = name_map(pool, "store").await?;
        let product_names = name_map(pool, "product").await?;

        let total = raws.len();
        let rows: Vec<StockBalanceRow> = raws
            .iter()
            .filter_map(|v| map_balance(v, &store_names, &product_names))
            .collect();
        let dropped = total - rows.len();
        if dropped > 0 {
            warn!(dropped, "balance rows dropped (unknown ids or malformed)");
        }

        let n = replace_stock_balances(pool, &rows).await?;
        anyhow::Ok((n as i64, dropped))
    };

    match apply.await {
        Ok((records, dropped)) => {
            let mut conn = pool.acquire().await?;
            sync_log_finish(&mut conn, log_id, clock.now_utc(), records).await?;
            info!(records, "stock balance sync succeeded");
            Ok(SyncOutcome::Success { records, dropped })
        }
        Err(e) => {
            let msg = format!("{e:#}");
            sync_log_fail(pool, log_id, clock.now_utc(), &msg).await?;
            Ok(SyncOutcome::Failed { message: msg })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    const S: &str = "11111111-1111-1111-1111-111111111111";
    const P: &str = "22222222-2222-2222-2222-222222222222";

    fn maps() -> (HashMap<Uuid, String>, HashMap<Uuid, String>) {
        let mut stores = HashMap::new();
        stores.insert(S.parse().unwrap(), "Бар (Центр)".to_string());
        let mut products = HashMap::new();
        products.insert(P.parse().unwrap(), "Лимон".to_string());
        (stores, products)
    }

    #[test]
    fn balance_maps_with_known_names() {
        let (stores, products) = maps();
        let row = map_balance(
            &json!({"store": S, "product": P, "amount": -3.0, "sum": -150.5}),
            &stores,
            &products,
        )
        .unwrap();
        assert_eq!(row.amount, dec!(-3));
        assert_eq!(row.money, dec!(-150.5));
        assert_eq!(row.store_name, "Бар (Центр)");
    }

    #[test]
    fn unknown_store_or_null_amount_drops_row() {
        let (stores, products) = maps();
        let unknown = json!({"store": P, "product": P, "amount": 1});
        assert!(map_balance(&unknown, &stores, &products).is_none());

        let null_amount = json!({"store": S, "product": P, "amount": null});
        assert!(map_balance(&null_amount, &stores, &products).is_none());
    }
}
