//! Stock-balance mirror: full-replace semantics.
//!
//! Readers must observe either the previous complete snapshot or the new
//! one, so delete + insert happen in a single transaction. No partial state
//! is ever visible.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::upsert::DbValue;
use crate::{batch_upsert, UpsertSpec};
use galley_schemas::StockBalanceRow;

const STOCK_BALANCE: UpsertSpec = UpsertSpec {
    table: "stock_balance",
    columns: &[
        "store_id",
        "product_id",
        "store_name",
        "product_name",
        "amount",
        "money",
    ],
    conflict: &["store_id", "product_id"],
};

/// Replace the whole table with the new snapshot in one transaction.
pub async fn replace_stock_balances(pool: &PgPool, rows: &[StockBalanceRow]) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("replace_stock_balances begin failed")?;

    sqlx::query("delete from stock_balance")
        .execute(&mut *tx)
        .await
        .context("replace_stock_balances clear failed")?;

    let values: Vec<Vec<DbValue>> = rows
        .iter()
        .map(|r| {
            vec![
                DbValue::Uuid(r.store_id),
                DbValue::Uuid(r.product_id),
                DbValue::Str(r.store_name.clone()),
                DbValue::Str(r.product_name.clone()),
                DbValue::Decimal(r.amount),
                DbValue::Decimal(r.money),
            ]
        })
        .collect();

    let n = batch_upsert(&mut *tx, &STOCK_BALANCE, values).await?;

    tx.commit()
        .await
        .context("replace_stock_balances commit failed")?;
    Ok(n)
}

/// Balances for one store, for the negative-balance checks and operator
/// views.
pub async fn stock_balances_for_store(
    pool: &PgPool,
    store_id: Uuid,
) -> Result<Vec<StockBalanceRow>> {
    let rows = sqlx::query(
        r#"
        select store_id, product_id, store_name, product_name, amount, money
        from stock_balance
        where store_id = $1
        order by product_name
        "#,
    )
    .bind(store_id)
    .fetch_all(pool)
    .await
    .context("stock_balances_for_store failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StockBalanceRow {
            store_id: row.try_get("store_id")?,
            product_id: row.try_get("product_id")?,
            store_name: row.try_get("store_name")?,
            product_name: row.try_get("product_name")?,
            amount: row.try_get::<Decimal, _>("amount")?,
            money: row.try_get::<Decimal, _>("money")?,
        });
    }
    Ok(out)
}
