//! Sync audit log.
//!
//! Every reconcile attempt writes exactly one row: inserted as `running`
//! when the run starts, finished as `success` or `error`. A `running` row
//! with no `finished_at` means the process died mid-run — acceptable, and
//! visible in the audit trail.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use galley_schemas::{SyncLogRow, SyncStatus, SyncTrigger};

/// Insert the `running` row on its own connection (used when the run's main
/// transaction should not own the audit insert, e.g. failure bookkeeping).
pub async fn sync_log_start(
    pool: &PgPool,
    entity_type: &str,
    started_at: DateTime<Utc>,
    triggered_by: SyncTrigger,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into sync_log (entity_type, started_at, status, records_synced, triggered_by)
        values ($1, $2, 'running', 0, $3)
        returning id
        "#,
    )
    .bind(entity_type)
    .bind(started_at)
    .bind(triggered_by.as_str())
    .fetch_one(pool)
    .await
    .context("sync_log_start failed")?;

    Ok(id)
}

/// Same insert inside the caller's transaction — used by the one-commit
/// entity fan-out where the audit row must land with the data.
pub async fn sync_log_start_tx(
    conn: &mut PgConnection,
    entity_type: &str,
    started_at: DateTime<Utc>,
    triggered_by: SyncTrigger,
) -> Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        insert into sync_log (entity_type, started_at, status, records_synced, triggered_by)
        values ($1, $2, 'running', 0, $3)
        returning id
        "#,
    )
    .bind(entity_type)
    .bind(started_at)
    .bind(triggered_by.as_str())
    .fetch_one(conn)
    .await
    .context("sync_log_start_tx failed")?;

    Ok(id)
}

/// Terminal `success` update inside the run's transaction.
pub async fn sync_log_finish(
    conn: &mut PgConnection,
    id: i64,
    finished_at: DateTime<Utc>,
    records_synced: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        update sync_log
        set status = 'success',
            finished_at = $2,
            records_synced = $3
        where id = $1
        "#,
    )
    .bind(id)
    .bind(finished_at)
    .bind(records_synced)
    .execute(conn)
    .await
    .context("sync_log_finish failed")?;

    Ok(())
}

/// Terminal `error` update. Runs on the pool, not the rolled-back
/// transaction: the failure row must survive the rollback.
pub async fn sync_log_fail(
    pool: &PgPool,
    id: i64,
    finished_at: DateTime<Utc>,
    error_message: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        update sync_log
        set status = 'error',
            finished_at = $2,
            error_message = $3
        where id = $1
        "#,
    )
    .bind(id)
    .bind(finished_at)
    .bind(error_message)
    .execute(pool)
    .await
    .context("sync_log_fail failed")?;

    Ok(())
}

/// Latest runs for the operator's sync report, newest first.
pub async fn recent_sync_runs(pool: &PgPool, limit: i64) -> Result<Vec<SyncLogRow>> {
    let rows = sqlx::query(
        r#"
        select id, entity_type, started_at, finished_at, status,
               records_synced, error_message, triggered_by
        from sync_log
        order by started_at desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("recent_sync_runs failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(SyncLogRow {
            id: row.try_get("id")?,
            entity_type: row.try_get("entity_type")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            status: SyncStatus::parse(&row.try_get::<String, _>("status")?)?,
            records_synced: row.try_get("records_synced")?,
            error_message: row.try_get("error_message")?,
            triggered_by: row.try_get("triggered_by")?,
        });
    }
    Ok(out)
}
