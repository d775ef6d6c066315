//! Scenario: the document UUID is the idempotency key.
//!
//! # Invariants under test (in-process, no DB or network)
//!
//! 1. Re-POSTing a write-off with the same UUID yields a single upstream
//!    document, no matter how many POSTs were accepted.
//! 2. The approval retry path (transient failure, then success) converges
//!    on exactly one document because it reuses the UUID.
//! 3. Distinct UUIDs produce distinct documents.

use rust_decimal_macros::dec;
use uuid::Uuid;

use galley_clients::PosApi;
use galley_schemas::{DocItem, WriteoffDoc};
use galley_testkit::FakePos;

fn doc(doc_uuid: Uuid) -> WriteoffDoc {
    WriteoffDoc {
        doc_uuid,
        store_id: Uuid::from_u128(1),
        account_id: Uuid::from_u128(2),
        comment: "Бой (Автор: Иванов Иван)".to_string(),
        items: vec![DocItem {
            product_id: Uuid::from_u128(3),
            product_name: "Бокал".to_string(),
            quantity: dec!(2),
            measure_unit: Some("шт".to_string()),
        }],
    }
}

fn today() -> chrono::NaiveDate {
    chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
}

#[tokio::test]
async fn same_uuid_twice_yields_one_document() {
    let pos = FakePos::new();
    let d = doc(Uuid::from_u128(0xABCD));

    pos.send_writeoff(&d, today()).await.unwrap();
    pos.send_writeoff(&d, today()).await.unwrap();

    assert_eq!(pos.accepted_posts(), 2, "both POSTs reach the upstream");
    assert_eq!(pos.distinct_writeoffs(), 1, "they collapse into one document");
}

#[tokio::test]
async fn retry_after_transient_failure_converges_on_one_document() {
    let pos = FakePos::new();
    pos.fail_next_submits(1);
    let d = doc(Uuid::from_u128(0xBEEF));

    let first = pos.send_writeoff(&d, today()).await;
    assert!(first.is_err(), "injected failure surfaces");
    assert!(first.unwrap_err().is_transient());

    pos.send_writeoff(&d, today()).await.unwrap();
    assert_eq!(pos.distinct_writeoffs(), 1);
}

#[tokio::test]
async fn distinct_uuids_are_distinct_documents() {
    let pos = FakePos::new();
    pos.send_writeoff(&doc(Uuid::from_u128(1)), today()).await.unwrap();
    pos.send_writeoff(&doc(Uuid::from_u128(2)), today()).await.unwrap();
    assert_eq!(pos.distinct_writeoffs(), 2);
}
