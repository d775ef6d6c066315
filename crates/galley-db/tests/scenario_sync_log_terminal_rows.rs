//! Sync audit invariants: one row per run, terminal status, ordered
//! timestamps.
//!
//! Requires a live PostgreSQL instance via GALLEY_DATABASE_URL.

use chrono::{Duration, Utc};

use galley_db::{recent_sync_runs, sync_log_fail, sync_log_finish, sync_log_start};
use galley_schemas::{SyncStatus, SyncTrigger};

async fn pool() -> sqlx::PgPool {
    let url = std::env::var("GALLEY_DATABASE_URL")
        .expect("DB tests require GALLEY_DATABASE_URL; run with --include-ignored");
    let pool = sqlx::PgPool::connect(&url).await.expect("connect");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
    pool
}

#[tokio::test]
#[ignore = "requires GALLEY_DATABASE_URL; run: GALLEY_DATABASE_URL=postgres://… cargo test -p galley-db -- --include-ignored"]
async fn success_run_writes_exactly_one_terminal_row() {
    let pool = pool().await;
    let started = Utc::now();

    let id = sync_log_start(&pool, "test_entity", started, SyncTrigger::Operator)
        .await
        .expect("start");

    let mut conn = pool.acquire().await.expect("acquire");
    sync_log_finish(&mut conn, id, started + Duration::seconds(2), 42)
        .await
        .expect("finish");
    drop(conn);

    let runs = recent_sync_runs(&pool, 50).await.expect("recent");
    let row = runs.iter().find(|r| r.id == id).expect("our row");
    assert_eq!(row.status, SyncStatus::Success);
    assert_eq!(row.records_synced, 42);
    assert!(row.finished_at.expect("finished") >= row.started_at);
}

#[tokio::test]
#[ignore = "requires GALLEY_DATABASE_URL; run with --include-ignored"]
async fn error_path_records_message() {
    let pool = pool().await;
    let started = Utc::now();

    let id = sync_log_start(&pool, "test_entity", started, SyncTrigger::Schedule)
        .await
        .expect("start");
    sync_log_fail(&pool, id, started + Duration::seconds(1), "upstream timed out")
        .await
        .expect("fail");

    let runs = recent_sync_runs(&pool, 50).await.expect("recent");
    let row = runs.iter().find(|r| r.id == id).expect("our row");
    assert_eq!(row.status, SyncStatus::Error);
    assert_eq!(row.error_message.as_deref(), Some("upstream timed out"));
}

#[tokio::test]
#[ignore = "requires GALLEY_DATABASE_URL; run with --include-ignored"]
async fn finished_before_started_is_rejected_by_schema() {
    let pool = pool().await;
    let started = Utc::now();

    let id = sync_log_start(&pool, "test_entity", started, SyncTrigger::Operator)
        .await
        .expect("start");

    let mut conn = pool.acquire().await.expect("acquire");
    let res = sync_log_finish(&mut conn, id, started - Duration::seconds(5), 1).await;
    assert!(res.is_err(), "check constraint must reject backwards time");
}
