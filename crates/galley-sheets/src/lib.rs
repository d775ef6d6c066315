//! Spreadsheet transport seam and the semantic operations built on it.
//!
//! The spreadsheet is the source of truth for per-user capabilities,
//! min/max stock levels, and export-group configuration; the daily chain
//! writes the product catalogue and the permission matrix back. Transport
//! details stay behind [`SheetClient`] — the core needs exactly "read tab
//! as records" and "write tab as records" (plus dropdown validation and
//! column hiding for the authored tabs).

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

pub mod export;
pub mod minmax;
pub mod permissions;

pub use export::{export_catalogue, export_permission_matrix, read_export_groups};
pub use minmax::parse_min_stock_records;
pub use permissions::{PermissionMatrix, PermissionsService, GRANT_MARK, USER_ID_COLUMN};

/// One spreadsheet row: header cell → value, empty cells omitted.
pub type SheetRecord = BTreeMap<String, String>;

/// Transport contract. Implementations own auth, batching, and API quirks.
#[async_trait]
pub trait SheetClient: Send + Sync {
    /// Read a tab; the first row is the header.
    async fn read_records(&self, tab: &str) -> Result<Vec<SheetRecord>>;

    /// Replace a tab's contents with `header` + `rows`.
    async fn write_records(
        &self,
        tab: &str,
        header: &[String],
        rows: &[Vec<String>],
    ) -> Result<()>;

    /// Attach a dropdown validation to a column (by header name).
    async fn set_dropdown(&self, tab: &str, column: &str, options: &[String]) -> Result<()>;

    /// Hide a column (ids the operators should not touch).
    async fn hide_column(&self, tab: &str, column: &str) -> Result<()>;
}

// Well-known tab names.
pub const TAB_PERMISSIONS: &str = "Права";
pub const TAB_MIN_MAX: &str = "МинМакс";
pub const TAB_EXPORT_GROUPS: &str = "Группы выгрузки";
pub const TAB_CATALOGUE: &str = "Номенклатура";
pub const TAB_OCR_MAPPING: &str = "Сопоставление";
