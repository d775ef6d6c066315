//! Min/max stock levels and the shortage query.
//!
//! The spreadsheet is the source of truth; this table is a cache refreshed
//! by the daily chain. Replacement is wholesale inside one transaction, the
//! same discipline as the stock-balance mirror.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use galley_schemas::MinStockRow;

pub async fn replace_min_stock(pool: &PgPool, rows: &[MinStockRow]) -> Result<usize> {
    let mut tx = pool.begin().await.context("replace_min_stock begin failed")?;

    sqlx::query("delete from min_stock_level")
        .execute(&mut *tx)
        .await
        .context("replace_min_stock clear failed")?;

    for row in rows {
        sqlx::query(
            r#"
            insert into min_stock_level (product_id, department_id, min_level, max_level)
            values ($1, $2, $3, $4)
            "#,
        )
        .bind(row.product_id)
        .bind(row.department_id)
        .bind(row.min_level)
        .bind(row.max_level)
        .execute(&mut *tx)
        .await
        .context("replace_min_stock insert failed")?;
    }

    tx.commit().await.context("replace_min_stock commit failed")?;
    Ok(rows.len())
}

#[derive(Debug, Clone)]
pub struct StockShortageRow {
    pub product_id: Uuid,
    pub product_name: String,
    pub store_name: String,
    pub amount: Decimal,
    pub min_level: Decimal,
}

/// Products whose mirrored balance sits below the configured minimum for
/// the given department, ordered by how far below they are.
pub async fn stock_below_min(pool: &PgPool, department_id: Uuid) -> Result<Vec<StockShortageRow>> {
    let rows = sqlx::query(
        r#"
        select b.product_id,
               b.product_name,
               b.store_name,
               b.amount,
               m.min_level
        from min_stock_level m
        join store s on s.parent_id = m.department_id
        join stock_balance b on b.product_id = m.product_id and b.store_id = s.id
        where m.department_id = $1
          and b.amount < m.min_level
        order by (m.min_level - b.amount) desc
        "#,
    )
    .bind(department_id)
    .fetch_all(pool)
    .await
    .context("stock_below_min failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StockShortageRow {
            product_id: row.try_get("product_id")?,
            product_name: row.try_get("product_name")?,
            store_name: row.try_get("store_name")?,
            amount: row.try_get("amount")?,
            min_level: row.try_get("min_level")?,
        });
    }
    Ok(out)
}
