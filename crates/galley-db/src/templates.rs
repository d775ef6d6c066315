//! Invoice templates, product requests, and the OCR staging tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Invoice templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InvoiceTemplateRow {
    pub id: i64,
    pub owner_chat_id: i64,
    pub name: String,
    pub store_id: Uuid,
    pub supplier_id: Uuid,
    pub items: Value,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_invoice_template(
    pool: &PgPool,
    owner_chat_id: i64,
    name: &str,
    store_id: Uuid,
    supplier_id: Uuid,
    items: &Value,
    created_at: DateTime<Utc>,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into invoice_template (owner_chat_id, name, store_id, supplier_id, items, created_at)
        values ($1, $2, $3, $4, $5, $6)
        returning id
        "#,
    )
    .bind(owner_chat_id)
    .bind(name)
    .bind(store_id)
    .bind(supplier_id)
    .bind(items)
    .bind(created_at)
    .fetch_one(pool)
    .await
    .context("insert_invoice_template failed")?;

    Ok(id)
}

pub async fn list_invoice_templates(
    pool: &PgPool,
    owner_chat_id: i64,
) -> Result<Vec<InvoiceTemplateRow>> {
    let rows = sqlx::query(
        r#"
        select id, owner_chat_id, name, store_id, supplier_id, items, created_at
        from invoice_template
        where owner_chat_id = $1
        order by name
        "#,
    )
    .bind(owner_chat_id)
    .fetch_all(pool)
    .await
    .context("list_invoice_templates failed")?;

    rows.iter().map(template_from_row).collect()
}

pub async fn load_invoice_template(pool: &PgPool, id: i64) -> Result<Option<InvoiceTemplateRow>> {
    let row = sqlx::query(
        r#"
        select id, owner_chat_id, name, store_id, supplier_id, items, created_at
        from invoice_template
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("load_invoice_template failed")?;

    row.as_ref().map(template_from_row).transpose()
}

pub async fn delete_invoice_template(pool: &PgPool, id: i64, owner_chat_id: i64) -> Result<bool> {
    let res = sqlx::query("delete from invoice_template where id = $1 and owner_chat_id = $2")
        .bind(id)
        .bind(owner_chat_id)
        .execute(pool)
        .await
        .context("delete_invoice_template failed")?;

    Ok(res.rows_affected() == 1)
}

fn template_from_row(row: &sqlx::postgres::PgRow) -> Result<InvoiceTemplateRow> {
    Ok(InvoiceTemplateRow {
        id: row.try_get("id")?,
        owner_chat_id: row.try_get("owner_chat_id")?,
        name: row.try_get("name")?,
        store_id: row.try_get("store_id")?,
        supplier_id: row.try_get("supplier_id")?,
        items: row.try_get("items")?,
        created_at: row.try_get("created_at")?,
    })
}

// ---------------------------------------------------------------------------
// Product requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProductRequestRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub author_chat_id: i64,
    pub author_name: String,
    pub department_id: Option<Uuid>,
    /// open | processed | cancelled.
    pub status: String,
    pub items: Value,
    /// `{receiver_chat_id: message_id, …}` for keyboard cleanup.
    pub receiver_msg_ids: Value,
}

pub async fn insert_product_request(
    pool: &PgPool,
    created_at: DateTime<Utc>,
    author_chat_id: i64,
    author_name: &str,
    department_id: Option<Uuid>,
    items: &Value,
    receiver_msg_ids: &Value,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into product_request (
          created_at, author_chat_id, author_name, department_id, status, items, receiver_msg_ids
        ) values ($1, $2, $3, $4, 'open', $5, $6)
        returning id
        "#,
    )
    .bind(created_at)
    .bind(author_chat_id)
    .bind(author_name)
    .bind(department_id)
    .bind(items)
    .bind(receiver_msg_ids)
    .fetch_one(pool)
    .await
    .context("insert_product_request failed")?;

    Ok(id)
}

pub async fn load_product_request(pool: &PgPool, id: i64) -> Result<Option<ProductRequestRow>> {
    let row = sqlx::query(
        r#"
        select id, created_at, author_chat_id, author_name, department_id,
               status, items, receiver_msg_ids
        from product_request
        where id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("load_product_request failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(ProductRequestRow {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        author_chat_id: row.try_get("author_chat_id")?,
        author_name: row.try_get("author_name")?,
        department_id: row.try_get("department_id")?,
        status: row.try_get("status")?,
        items: row.try_get("items")?,
        receiver_msg_ids: row.try_get("receiver_msg_ids")?,
    }))
}

/// Move an open request to a terminal state. Conditional on `status='open'`
/// so exactly one receiver wins; the rest see `false`.
pub async fn settle_product_request(pool: &PgPool, id: i64, status: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update product_request
        set status = $2
        where id = $1
          and status = 'open'
        "#,
    )
    .bind(id)
    .bind(status)
    .execute(pool)
    .await
    .context("settle_product_request failed")?;

    Ok(res.rows_affected() == 1)
}

/// Replace item quantities while the request is still open.
pub async fn update_request_items(pool: &PgPool, id: i64, items: &Value) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update product_request
        set items = $2
        where id = $1
          and status = 'open'
        "#,
    )
    .bind(id)
    .bind(items)
    .execute(pool)
    .await
    .context("update_request_items failed")?;

    Ok(res.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// OCR staging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OcrDocumentRow {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub chat_id: i64,
    pub supplier_name: String,
    pub total: Option<Decimal>,
    /// VAT rate missing from the mapping table; suppresses sum-mismatch
    /// warnings for this document.
    pub rate_unknown: bool,
    pub warnings: Value,
}

pub async fn insert_ocr_document(
    pool: &PgPool,
    created_at: DateTime<Utc>,
    chat_id: i64,
    supplier_name: &str,
    total: Option<Decimal>,
    rate_unknown: bool,
    warnings: &Value,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into ocr_document (created_at, chat_id, supplier_name, total, rate_unknown, warnings)
        values ($1, $2, $3, $4, $5, $6)
        returning id
        "#,
    )
    .bind(created_at)
    .bind(chat_id)
    .bind(supplier_name)
    .bind(total)
    .bind(rate_unknown)
    .bind(warnings)
    .fetch_one(pool)
    .await
    .context("insert_ocr_document failed")?;

    Ok(id)
}

pub async fn insert_ocr_item(
    pool: &PgPool,
    document_id: i64,
    name: &str,
    quantity: Decimal,
    price: Option<Decimal>,
    total: Option<Decimal>,
    mapped_product_id: Option<Uuid>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into ocr_item (document_id, name, quantity, price, total, mapped_product_id)
        values ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(document_id)
    .bind(name)
    .bind(quantity)
    .bind(price)
    .bind(total)
    .bind(mapped_product_id)
    .execute(pool)
    .await
    .context("insert_ocr_item failed")?;

    Ok(())
}
