//! Pending write-offs and the approved-acts history.
//!
//! A pending row is in exactly one of three states: unlocked, locked by an
//! admin, or absent. The conditional update on `is_locked` is the sole
//! serialisation point between admins — deliberately a DB-level CAS rather
//! than an in-process mutex, so multiple replicas behave identically.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Rows older than this are swept and their authors notified.
pub const PENDING_WRITEOFF_TTL_HOURS: i64 = 24;

/// Per-author cap on history rows; oldest pruned beyond it.
pub const WRITEOFF_HISTORY_CAP: i64 = 200;

#[derive(Debug, Clone)]
pub struct PendingWriteoffRow {
    /// Short hex id shown in chat; primary key.
    pub doc_id: String,
    /// Idempotency key for the eventual POS POST.
    pub doc_uuid: Uuid,
    pub created_at: DateTime<Utc>,
    pub author_chat_id: i64,
    pub author_name: String,
    pub store_id: Uuid,
    pub store_name: String,
    pub account_id: Uuid,
    pub account_name: String,
    pub reason: String,
    pub department_id: Option<Uuid>,
    /// `[{product_id, product_name, quantity, measure_unit}, …]`.
    pub items: Value,
    /// `{admin_chat_id: message_id, …}` for keyboard cleanup on completion.
    pub admin_msg_ids: Value,
    pub is_locked: bool,
}

pub async fn insert_pending_writeoff(pool: &PgPool, row: &PendingWriteoffRow) -> Result<()> {
    sqlx::query(
        r#"
        insert into pending_writeoff (
          doc_id, doc_uuid, created_at, author_chat_id, author_name,
          store_id, store_name, account_id, account_name, reason,
          department_id, items, admin_msg_ids, is_locked
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, false)
        "#,
    )
    .bind(&row.doc_id)
    .bind(row.doc_uuid)
    .bind(row.created_at)
    .bind(row.author_chat_id)
    .bind(&row.author_name)
    .bind(row.store_id)
    .bind(&row.store_name)
    .bind(row.account_id)
    .bind(&row.account_name)
    .bind(&row.reason)
    .bind(row.department_id)
    .bind(&row.items)
    .bind(&row.admin_msg_ids)
    .execute(pool)
    .await
    .context("insert_pending_writeoff failed")?;

    Ok(())
}

/// Atomic claim: first admin wins, everyone else sees zero rows affected.
/// Returns true when this caller now owns the document.
pub async fn try_lock_pending_writeoff(pool: &PgPool, doc_id: &str) -> Result<bool> {
    let res = sqlx::query(
        r#"
        update pending_writeoff
        set is_locked = true
        where doc_id = $1
          and is_locked = false
        "#,
    )
    .bind(doc_id)
    .execute(pool)
    .await
    .context("try_lock_pending_writeoff failed")?;

    Ok(res.rows_affected() == 1)
}

/// Release a held lock (admin pressed "back" instead of deciding).
pub async fn release_writeoff_lock(pool: &PgPool, doc_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        update pending_writeoff
        set is_locked = false
        where doc_id = $1
        "#,
    )
    .bind(doc_id)
    .execute(pool)
    .await
    .context("release_writeoff_lock failed")?;

    Ok(())
}

/// Record the per-admin review-card message ids after the fan-out.
pub async fn set_admin_msg_ids(pool: &PgPool, doc_id: &str, admin_msg_ids: &Value) -> Result<()> {
    sqlx::query(
        r#"
        update pending_writeoff
        set admin_msg_ids = $2
        where doc_id = $1
        "#,
    )
    .bind(doc_id)
    .bind(admin_msg_ids)
    .execute(pool)
    .await
    .context("set_admin_msg_ids failed")?;

    Ok(())
}

/// Replace the item list while an admin holds the lock (quantity edits).
pub async fn update_pending_writeoff_items(pool: &PgPool, doc_id: &str, items: &Value) -> Result<()> {
    sqlx::query(
        r#"
        update pending_writeoff
        set items = $2
        where doc_id = $1
        "#,
    )
    .bind(doc_id)
    .bind(items)
    .execute(pool)
    .await
    .context("update_pending_writeoff_items failed")?;

    Ok(())
}

pub async fn load_pending_writeoff(
    pool: &PgPool,
    doc_id: &str,
) -> Result<Option<PendingWriteoffRow>> {
    let row = sqlx::query(
        r#"
        select doc_id, doc_uuid, created_at, author_chat_id, author_name,
               store_id, store_name, account_id, account_name, reason,
               department_id, items, admin_msg_ids, is_locked
        from pending_writeoff
        where doc_id = $1
        "#,
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await
    .context("load_pending_writeoff failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(row_to_pending(&row)?))
}

/// Both approve and reject end here; the row must not outlive the decision.
pub async fn delete_pending_writeoff(pool: &PgPool, doc_id: &str) -> Result<bool> {
    let res = sqlx::query("delete from pending_writeoff where doc_id = $1")
        .bind(doc_id)
        .execute(pool)
        .await
        .context("delete_pending_writeoff failed")?;

    Ok(res.rows_affected() == 1)
}

/// Rows past the TTL, oldest first, for the sweep job.
pub async fn expired_pending_writeoffs(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<PendingWriteoffRow>> {
    let rows = sqlx::query(
        r#"
        select doc_id, doc_uuid, created_at, author_chat_id, author_name,
               store_id, store_name, account_id, account_name, reason,
               department_id, items, admin_msg_ids, is_locked
        from pending_writeoff
        where created_at < $1 - make_interval(hours => $2::int)
        order by created_at asc
        "#,
    )
    .bind(now)
    .bind(PENDING_WRITEOFF_TTL_HOURS)
    .fetch_all(pool)
    .await
    .context("expired_pending_writeoffs failed")?;

    rows.iter().map(row_to_pending).collect()
}

fn row_to_pending(row: &sqlx::postgres::PgRow) -> Result<PendingWriteoffRow> {
    Ok(PendingWriteoffRow {
        doc_id: row.try_get("doc_id")?,
        doc_uuid: row.try_get("doc_uuid")?,
        created_at: row.try_get("created_at")?,
        author_chat_id: row.try_get("author_chat_id")?,
        author_name: row.try_get("author_name")?,
        store_id: row.try_get("store_id")?,
        store_name: row.try_get("store_name")?,
        account_id: row.try_get("account_id")?,
        account_name: row.try_get("account_name")?,
        reason: row.try_get("reason")?,
        department_id: row.try_get("department_id")?,
        items: row.try_get("items")?,
        admin_msg_ids: row.try_get("admin_msg_ids")?,
        is_locked: row.try_get("is_locked")?,
    })
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub async fn insert_writeoff_history(
    pool: &PgPool,
    doc_uuid: Uuid,
    author_chat_id: i64,
    author_name: &str,
    store_name: &str,
    account_name: &str,
    reason: &str,
    items: &Value,
    approved_at: DateTime<Utc>,
    approved_by: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into writeoff_history (
          doc_uuid, author_chat_id, author_name, store_name, account_name,
          reason, items, approved_at, approved_by
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(doc_uuid)
    .bind(author_chat_id)
    .bind(author_name)
    .bind(store_name)
    .bind(account_name)
    .bind(reason)
    .bind(items)
    .bind(approved_at)
    .bind(approved_by)
    .execute(pool)
    .await
    .context("insert_writeoff_history failed")?;

    Ok(())
}

/// Keep the newest [`WRITEOFF_HISTORY_CAP`] rows per author; returns the
/// number pruned.
pub async fn prune_writeoff_history(pool: &PgPool, author_chat_id: i64) -> Result<u64> {
    let res = sqlx::query(
        r#"
        delete from writeoff_history
        where author_chat_id = $1
          and id not in (
            select id
            from writeoff_history
            where author_chat_id = $1
            order by approved_at desc
            limit $2
          )
        "#,
    )
    .bind(author_chat_id)
    .bind(WRITEOFF_HISTORY_CAP)
    .execute(pool)
    .await
    .context("prune_writeoff_history failed")?;

    Ok(res.rows_affected())
}
