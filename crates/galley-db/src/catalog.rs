//! Reference-mirror read queries used by the conversation workflows.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use galley_schemas::ProductRow;

#[derive(Debug, Clone)]
pub struct NamedRef {
    pub id: Uuid,
    pub name: String,
}

pub async fn list_departments(pool: &PgPool) -> Result<Vec<NamedRef>> {
    let rows = sqlx::query(
        r#"
        select id, name
        from department
        where department_type = 'DEPARTMENT'
        order by name
        "#,
    )
    .fetch_all(pool)
    .await
    .context("list_departments failed")?;

    rows.iter().map(named).collect()
}

pub async fn stores_for_department(pool: &PgPool, department_id: Uuid) -> Result<Vec<NamedRef>> {
    let rows = sqlx::query(
        r#"
        select id, name
        from store
        where parent_id = $1
        order by name
        "#,
    )
    .bind(department_id)
    .fetch_all(pool)
    .await
    .context("stores_for_department failed")?;

    rows.iter().map(named).collect()
}

pub async fn all_stores(pool: &PgPool) -> Result<Vec<NamedRef>> {
    let rows = sqlx::query("select id, name from store order by name")
        .fetch_all(pool)
        .await
        .context("all_stores failed")?;

    rows.iter().map(named).collect()
}

/// Write-off accounts: the ACCOUNT slice of the shared entity table,
/// filtered by name substring. The segment filter (bar/kitchen) happens at
/// the workflow layer where the store choice is known.
pub async fn writeoff_accounts(pool: &PgPool) -> Result<Vec<NamedRef>> {
    let rows = sqlx::query(
        r#"
        select id, name
        from entity
        where root_type = 'ACCOUNT'
          and deleted = false
          and lower(name) like '%списание%'
        order by name
        "#,
    )
    .fetch_all(pool)
    .await
    .context("writeoff_accounts failed")?;

    rows.iter().map(named).collect()
}

pub async fn search_suppliers(pool: &PgPool, term: &str, limit: i64) -> Result<Vec<NamedRef>> {
    let rows = sqlx::query(
        r#"
        select id, name
        from supplier
        where deleted = false
          and lower(name) like '%' || lower($1) || '%'
        order by name
        limit $2
        "#,
    )
    .bind(term.trim())
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("search_suppliers failed")?;

    rows.iter().map(named).collect()
}

/// Product search scoped to the configured export groups: the roots'
/// whole product-group subtrees are in scope.
pub async fn search_products_in_groups(
    pool: &PgPool,
    term: &str,
    roots: &[Uuid],
    limit: i64,
) -> Result<Vec<ProductRow>> {
    let rows = sqlx::query(
        r#"
        with recursive scope as (
            select id from product_group where id = any($2)
            union all
            select g.id
            from product_group g
            join scope s on g.parent_id = s.id
        )
        select p.id, p.parent_id, p.name, p.code, p.num, p.product_type,
               p.measure_unit, p.price, p.deleted, p.payload
        from product p
        join scope on p.parent_id = scope.id
        where p.deleted = false
          and lower(p.name) like '%' || lower($1) || '%'
        order by p.name
        limit $3
        "#,
    )
    .bind(term.trim())
    .bind(roots)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("search_products_in_groups failed")?;

    rows.iter().map(product).collect()
}

pub async fn all_products(pool: &PgPool) -> Result<Vec<ProductRow>> {
    let rows = sqlx::query(
        r#"
        select id, parent_id, name, code, num, product_type,
               measure_unit, price, deleted, payload
        from product
        order by name
        "#,
    )
    .fetch_all(pool)
    .await
    .context("all_products failed")?;

    rows.iter().map(product).collect()
}

/// Measure units from the MEASURE_UNIT slice, keyed by name.
pub async fn measure_units(pool: &PgPool) -> Result<Vec<NamedRef>> {
    let rows = sqlx::query(
        r#"
        select id, name
        from entity
        where root_type = 'MEASURE_UNIT'
          and deleted = false
        order by name
        "#,
    )
    .fetch_all(pool)
    .await
    .context("measure_units failed")?;

    rows.iter().map(named).collect()
}

pub async fn product_by_id(pool: &PgPool, id: Uuid) -> Result<Option<ProductRow>> {
    let row = sqlx::query(
        r#"
        select id, parent_id, name, code, num, product_type,
               measure_unit, price, deleted, payload
        from product
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("product_by_id failed")?;

    row.as_ref().map(product).transpose()
}

pub async fn supplier_by_id(pool: &PgPool, id: Uuid) -> Result<Option<NamedRef>> {
    let row = sqlx::query("select id, name from supplier where id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("supplier_by_id failed")?;

    row.as_ref().map(named).transpose()
}

fn named(row: &sqlx::postgres::PgRow) -> Result<NamedRef> {
    Ok(NamedRef {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}

fn product(row: &sqlx::postgres::PgRow) -> Result<ProductRow> {
    Ok(ProductRow {
        id: row.try_get("id")?,
        parent_id: row.try_get("parent_id")?,
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        num: row.try_get("num")?,
        product_type: row.try_get("product_type")?,
        measure_unit: row.try_get("measure_unit")?,
        price: row.try_get("price")?,
        deleted: row.try_get("deleted")?,
        payload: row.try_get("payload")?,
    })
}

/// Resolve a store id by exact name (nightly transfer sources/targets).
pub async fn store_by_name(pool: &PgPool, name: &str) -> Result<Option<NamedRef>> {
    let row = sqlx::query("select id, name from store where name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("store_by_name failed")?;

    row.as_ref().map(named).transpose()
}
