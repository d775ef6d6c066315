//! Stop-list mirror, enter/leave history, and pinned-message tracking.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use galley_schemas::StoplistPair;

/// Current stop-list pairs as mirrored locally.
pub async fn active_stoplist_pairs(pool: &PgPool) -> Result<Vec<StoplistPair>> {
    let rows = sqlx::query(
        r#"
        select product_id, terminal_group_id
        from active_stoplist
        "#,
    )
    .fetch_all(pool)
    .await
    .context("active_stoplist_pairs failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(StoplistPair {
            product_id: row.try_get("product_id")?,
            terminal_group_id: row.try_get("terminal_group_id")?,
        });
    }
    Ok(out)
}

/// Insert a newly stopped pair. Idempotent: a duplicate webhook replay does
/// not create a second row.
pub async fn upsert_active_pair(
    pool: &PgPool,
    pair: &StoplistPair,
    product_name: &str,
    since: DateTime<Utc>,
) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into active_stoplist (product_id, terminal_group_id, product_name, since)
        values ($1, $2, $3, $4)
        on conflict (product_id, terminal_group_id) do nothing
        returning id
        "#,
    )
    .bind(pair.product_id)
    .bind(pair.terminal_group_id)
    .bind(product_name)
    .bind(since)
    .fetch_optional(pool)
    .await
    .context("upsert_active_pair failed")?;

    Ok(row.is_some())
}

pub async fn remove_active_pair(pool: &PgPool, pair: &StoplistPair) -> Result<bool> {
    let res = sqlx::query(
        r#"
        delete from active_stoplist
        where product_id = $1 and terminal_group_id = $2
        "#,
    )
    .bind(pair.product_id)
    .bind(pair.terminal_group_id)
    .execute(pool)
    .await
    .context("remove_active_pair failed")?;

    Ok(res.rows_affected() == 1)
}

/// Open a history interval when a product enters the stop list.
pub async fn open_stoplist_interval(
    pool: &PgPool,
    pair: &StoplistPair,
    product_name: &str,
    started_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into stoplist_history (product_id, terminal_group_id, product_name, started_at)
        values ($1, $2, $3, $4)
        "#,
    )
    .bind(pair.product_id)
    .bind(pair.terminal_group_id)
    .bind(product_name)
    .bind(started_at)
    .execute(pool)
    .await
    .context("open_stoplist_interval failed")?;

    Ok(())
}

/// Close the open interval for a departed pair. Only the open row
/// (`ended_at is null`) is touched; replays are no-ops.
pub async fn close_stoplist_interval(
    pool: &PgPool,
    pair: &StoplistPair,
    ended_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        update stoplist_history
        set ended_at = $3,
            duration_seconds = extract(epoch from ($3 - started_at))::bigint
        where product_id = $1
          and terminal_group_id = $2
          and ended_at is null
        "#,
    )
    .bind(pair.product_id)
    .bind(pair.terminal_group_id)
    .bind(ended_at)
    .execute(pool)
    .await
    .context("close_stoplist_interval failed")?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct TimeInStopRow {
    pub product_name: String,
    pub total_seconds: i64,
    pub intervals: i64,
}

/// Per-product time in stop since `since`, for the evening report.
/// Open intervals count up to `until`.
pub async fn stoplist_time_in_stop(
    pool: &PgPool,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<TimeInStopRow>> {
    let rows = sqlx::query(
        r#"
        select product_name,
               sum(extract(epoch from (coalesce(ended_at, $2) - greatest(started_at, $1)))::bigint) as total_seconds,
               count(*)::bigint as intervals
        from stoplist_history
        where coalesce(ended_at, $2) > $1
        group by product_name
        order by total_seconds desc
        "#,
    )
    .bind(since)
    .bind(until)
    .fetch_all(pool)
    .await
    .context("stoplist_time_in_stop failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(TimeInStopRow {
            product_name: row.try_get("product_name")?,
            total_seconds: row.try_get("total_seconds")?,
            intervals: row.try_get("intervals")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Pinned messages
// ---------------------------------------------------------------------------

/// Which pinned message a row tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnedKind {
    Stoplist,
    StockAlert,
}

impl PinnedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinnedKind::Stoplist => "stoplist",
            PinnedKind::StockAlert => "stock_alert",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinnedMessageRow {
    pub chat_id: i64,
    pub message_id: i64,
    /// Hash of the last rendered content; edits are gated on it changing.
    pub snapshot_hash: String,
}

pub async fn pinned_message_get(
    pool: &PgPool,
    kind: PinnedKind,
    chat_id: i64,
) -> Result<Option<PinnedMessageRow>> {
    let row = sqlx::query(
        r#"
        select chat_id, message_id, snapshot_hash
        from pinned_message
        where kind = $1 and chat_id = $2
        "#,
    )
    .bind(kind.as_str())
    .bind(chat_id)
    .fetch_optional(pool)
    .await
    .context("pinned_message_get failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(PinnedMessageRow {
        chat_id: row.try_get("chat_id")?,
        message_id: row.try_get("message_id")?,
        snapshot_hash: row.try_get("snapshot_hash")?,
    }))
}

/// Every tracked pinned message of one kind, for fan-out updates.
pub async fn pinned_messages_all(pool: &PgPool, kind: PinnedKind) -> Result<Vec<PinnedMessageRow>> {
    let rows = sqlx::query(
        r#"
        select chat_id, message_id, snapshot_hash
        from pinned_message
        where kind = $1
        "#,
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await
    .context("pinned_messages_all failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(PinnedMessageRow {
            chat_id: row.try_get("chat_id")?,
            message_id: row.try_get("message_id")?,
            snapshot_hash: row.try_get("snapshot_hash")?,
        });
    }
    Ok(out)
}

pub async fn pinned_message_upsert(
    pool: &PgPool,
    kind: PinnedKind,
    chat_id: i64,
    message_id: i64,
    snapshot_hash: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into pinned_message (kind, chat_id, message_id, snapshot_hash)
        values ($1, $2, $3, $4)
        on conflict (kind, chat_id) do update
            set message_id = excluded.message_id,
                snapshot_hash = excluded.snapshot_hash
        "#,
    )
    .bind(kind.as_str())
    .bind(chat_id)
    .bind(message_id)
    .bind(snapshot_hash)
    .execute(pool)
    .await
    .context("pinned_message_upsert failed")?;

    Ok(())
}
