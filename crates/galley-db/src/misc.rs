//! Small operational tables: cloud token handoff, scheduler watermarks, and
//! the legacy admin/receiver tables kept behind a deployment flag.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

/// The cloud API token is written by an external process; we read the most
/// recent row and never write.
pub async fn latest_cloud_token(pool: &PgPool) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        select token
        from cloud_token
        order by created_at desc
        limit 1
        "#,
    )
    .fetch_optional(pool)
    .await
    .context("latest_cloud_token failed")?;

    Ok(row.map(|(t,)| t))
}

// ---------------------------------------------------------------------------
// Scheduler watermarks
// ---------------------------------------------------------------------------

/// Last completed fire time per job, used for the one-hour misfire grace:
/// a missed fire inside the window runs once on the next wake.
pub async fn sched_watermark_get(pool: &PgPool, job: &str) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        select fired_at
        from sched_watermark
        where job = $1
        "#,
    )
    .bind(job)
    .fetch_optional(pool)
    .await
    .context("sched_watermark_get failed")?;

    Ok(row.map(|(t,)| t))
}

pub async fn sched_watermark_set(pool: &PgPool, job: &str, fired_at: DateTime<Utc>) -> Result<()> {
    sqlx::query(
        r#"
        insert into sched_watermark (job, fired_at)
        values ($1, $2)
        on conflict (job) do update
            set fired_at = excluded.fired_at
        "#,
    )
    .bind(job)
    .bind(fired_at)
    .execute(pool)
    .await
    .context("sched_watermark_set failed")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Legacy admin / receiver tables
// ---------------------------------------------------------------------------
// The spreadsheet permission matrix is superseding these. Both paths stay
// selectable per deployment; only AdminDirectory reads them.

pub async fn legacy_admin_ids(pool: &PgPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("select chat_user_id from bot_admin")
        .fetch_all(pool)
        .await
        .context("legacy_admin_ids failed")?;

    rows.iter()
        .map(|r| r.try_get::<i64, _>("chat_user_id").map_err(Into::into))
        .collect()
}

pub async fn legacy_receiver_ids(pool: &PgPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("select chat_user_id from request_receiver")
        .fetch_all(pool)
        .await
        .context("legacy_receiver_ids failed")?;

    rows.iter()
        .map(|r| r.try_get::<i64, _>("chat_user_id").map_err(Into::into))
        .collect()
}
