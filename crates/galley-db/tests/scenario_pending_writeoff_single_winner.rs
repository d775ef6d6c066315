//! Admin race on a pending write-off: the conditional update is the only
//! serialisation point, so exactly one of two concurrent claims wins.
//!
//! Requires a live PostgreSQL instance via GALLEY_DATABASE_URL.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use galley_db::{
    delete_pending_writeoff, insert_pending_writeoff, release_writeoff_lock,
    try_lock_pending_writeoff, PendingWriteoffRow,
};

async fn pool() -> sqlx::PgPool {
    let url = std::env::var("GALLEY_DATABASE_URL")
        .expect("DB tests require GALLEY_DATABASE_URL; run with --include-ignored");
    let pool = sqlx::PgPool::connect(&url).await.expect("connect");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
    pool
}

fn row(doc_id: &str) -> PendingWriteoffRow {
    PendingWriteoffRow {
        doc_id: doc_id.to_string(),
        doc_uuid: Uuid::new_v4(),
        created_at: Utc::now(),
        author_chat_id: 777,
        author_name: "Иванов Иван".to_string(),
        store_id: Uuid::new_v4(),
        store_name: "Бар (Центр)".to_string(),
        account_id: Uuid::new_v4(),
        account_name: "Списание бар".to_string(),
        reason: "Бой".to_string(),
        department_id: None,
        items: json!([]),
        admin_msg_ids: json!({}),
        is_locked: false,
    }
}

#[tokio::test]
#[ignore = "requires GALLEY_DATABASE_URL; run: GALLEY_DATABASE_URL=postgres://… cargo test -p galley-db -- --include-ignored"]
async fn two_concurrent_claims_produce_one_winner() {
    let pool = pool().await;
    let doc_id = format!("race-{}", Uuid::new_v4().simple());
    insert_pending_writeoff(&pool, &row(&doc_id)).await.expect("insert");

    let (a, b) = tokio::join!(
        try_lock_pending_writeoff(&pool, &doc_id),
        try_lock_pending_writeoff(&pool, &doc_id),
    );
    let a = a.expect("claim a");
    let b = b.expect("claim b");

    assert!(a ^ b, "exactly one admin owns the document, got a={a} b={b}");

    delete_pending_writeoff(&pool, &doc_id).await.expect("cleanup");
}

#[tokio::test]
#[ignore = "requires GALLEY_DATABASE_URL; run with --include-ignored"]
async fn released_lock_can_be_claimed_again() {
    let pool = pool().await;
    let doc_id = format!("relock-{}", Uuid::new_v4().simple());
    insert_pending_writeoff(&pool, &row(&doc_id)).await.expect("insert");

    assert!(try_lock_pending_writeoff(&pool, &doc_id).await.expect("first"));
    assert!(!try_lock_pending_writeoff(&pool, &doc_id).await.expect("blocked"));

    release_writeoff_lock(&pool, &doc_id).await.expect("release");
    assert!(try_lock_pending_writeoff(&pool, &doc_id).await.expect("second"));

    delete_pending_writeoff(&pool, &doc_id).await.expect("cleanup");
}

#[tokio::test]
#[ignore = "requires GALLEY_DATABASE_URL; run with --include-ignored"]
async fn settled_document_is_absent() {
    let pool = pool().await;
    let doc_id = format!("settle-{}", Uuid::new_v4().simple());
    insert_pending_writeoff(&pool, &row(&doc_id)).await.expect("insert");

    assert!(delete_pending_writeoff(&pool, &doc_id).await.expect("delete"));
    assert!(!delete_pending_writeoff(&pool, &doc_id).await.expect("gone"));
    assert!(
        !try_lock_pending_writeoff(&pool, &doc_id).await.expect("claim"),
        "claims on an absent document affect zero rows"
    );
}
