//! Mirror-sync engine.
//!
//! A single generic reconciler (fetch → map → batched upsert →
//! sanity-gated mirror delete → audit row, one transaction per run) is
//! parametrised per entity kind. Fan-outs run the POS (8), finance (13),
//! and shared-entity (16 slices, one commit) reconcile sets concurrently,
//! preserving per-entity outcomes. Per-entity named locks keep scheduler
//! and operator triggers from double-running a reconcile.

pub mod engine;
pub mod entity;
pub mod finance;
pub mod locks;
pub mod pos;
pub mod raw;
pub mod stock;

pub use engine::{reconcile, MappedRow, RowKey, SyncOutcome};
pub use entity::sync_all_entity;
pub use finance::{sync_all_finance, sync_finance_resource, FinanceSyncDeps};
pub use locks::{SyncLockGuard, SyncLocks};
pub use pos::{sync_all_pos, PosSyncDeps};
pub use stock::sync_stock_balances;
