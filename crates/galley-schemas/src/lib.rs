//! Shared domain types used across the galley workspace.
//!
//! Everything here is plain data: serde-friendly structs and enums with no
//! I/O. Raw upstream payloads travel next to their typed extracts as
//! `serde_json::Value` snapshots so the mirror tables can keep the verbatim
//! record (see `galley-db`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub mod docs;
pub mod webhook;

pub use docs::{DocItem, InternalTransferDoc, OutgoingInvoiceDoc, WriteoffDoc};
pub use webhook::{StoplistPair, WebhookEnvelope, WebhookEvent};

// ---------------------------------------------------------------------------
// RootType — the 16 sub-kinds stored in the shared entity table
// ---------------------------------------------------------------------------

/// Sub-kind discriminator for the shared POS entity table.
///
/// A row's root type never changes after first sight; `(id, root_type)` is
/// the table's uniqueness key so the same upstream UUID may legitimately
/// appear under two kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RootType {
    Account,
    AccountingCategory,
    AlcoholClass,
    AttendanceType,
    Category,
    City,
    Conception,
    DiscountType,
    MeasureUnit,
    OrderType,
    PaymentType,
    ProductScale,
    ProductSize,
    ScheduleType,
    Street,
    TaxCategory,
}

impl RootType {
    /// All sixteen kinds, in the order the full-entity sync fans out.
    pub const ALL: [RootType; 16] = [
        RootType::Account,
        RootType::AccountingCategory,
        RootType::AlcoholClass,
        RootType::AttendanceType,
        RootType::Category,
        RootType::City,
        RootType::Conception,
        RootType::DiscountType,
        RootType::MeasureUnit,
        RootType::OrderType,
        RootType::PaymentType,
        RootType::ProductScale,
        RootType::ProductSize,
        RootType::ScheduleType,
        RootType::Street,
        RootType::TaxCategory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RootType::Account => "ACCOUNT",
            RootType::AccountingCategory => "ACCOUNTING_CATEGORY",
            RootType::AlcoholClass => "ALCOHOL_CLASS",
            RootType::AttendanceType => "ATTENDANCE_TYPE",
            RootType::Category => "CATEGORY",
            RootType::City => "CITY",
            RootType::Conception => "CONCEPTION",
            RootType::DiscountType => "DISCOUNT_TYPE",
            RootType::MeasureUnit => "MEASURE_UNIT",
            RootType::OrderType => "ORDER_TYPE",
            RootType::PaymentType => "PAYMENT_TYPE",
            RootType::ProductScale => "PRODUCT_SCALE",
            RootType::ProductSize => "PRODUCT_SIZE",
            RootType::ScheduleType => "SCHEDULE_TYPE",
            RootType::Street => "STREET",
            RootType::TaxCategory => "TAX_CATEGORY",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("invalid root type: {}", s))
    }

    /// Upstream resource name used in the POS entities endpoint query.
    pub fn upstream_name(&self) -> &'static str {
        match self {
            RootType::Account => "Account",
            RootType::AccountingCategory => "AccountingCategory",
            RootType::AlcoholClass => "AlcoholClass",
            RootType::AttendanceType => "AttendanceType",
            RootType::Category => "Category",
            RootType::City => "City",
            RootType::Conception => "Conception",
            RootType::DiscountType => "DiscountType",
            RootType::MeasureUnit => "MeasureUnit",
            RootType::OrderType => "OrderType",
            RootType::PaymentType => "PaymentType",
            RootType::ProductScale => "ProductScale",
            RootType::ProductSize => "ProductSize",
            RootType::ScheduleType => "ScheduleType",
            RootType::Street => "Street",
            RootType::TaxCategory => "TaxCategory",
        }
    }
}

// ---------------------------------------------------------------------------
// POS reference rows
// ---------------------------------------------------------------------------

/// One row of the shared entity table (one `root_type` slice of it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: Uuid,
    pub root_type: RootType,
    pub name: String,
    pub code: Option<String>,
    pub deleted: bool,
    /// Verbatim upstream payload.
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierRow {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub deleted: bool,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    /// Upstream type tag, e.g. "DEPARTMENT" | "ORGANIZATION".
    pub department_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub store_type: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductGroupRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub deleted: bool,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    pub name: String,
    pub code: Option<String>,
    pub num: Option<String>,
    /// GOODS | DISH | PREPARED | SERVICE | MODIFIER | RATE.
    pub product_type: String,
    pub measure_unit: Option<String>,
    pub price: Option<Decimal>,
    pub deleted: bool,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRow {
    pub id: Uuid,
    pub name: String,
    pub role_id: Option<Uuid>,
    pub role_code: Option<String>,
    pub deleted: bool,
    /// Chat-platform binding; the only reference field the bot mutates.
    pub chat_user_id: Option<i64>,
    pub department_id: Option<Uuid>,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeRoleRow {
    pub id: Uuid,
    pub name: String,
    pub code: Option<String>,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Finance reference rows
// ---------------------------------------------------------------------------

/// The finance mirror is thirteen flat tables keyed by upstream i64 id, all
/// structurally identical: id, display name, verbatim snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinanceResource {
    Categories,
    MoneyBags,
    Partners,
    Directions,
    Goods,
    Deals,
    Obligations,
    Employees,
    Accounts,
    Payments,
    Projects,
    Requisites,
    Taxes,
}

impl FinanceResource {
    pub const ALL: [FinanceResource; 13] = [
        FinanceResource::Categories,
        FinanceResource::MoneyBags,
        FinanceResource::Partners,
        FinanceResource::Directions,
        FinanceResource::Goods,
        FinanceResource::Deals,
        FinanceResource::Obligations,
        FinanceResource::Employees,
        FinanceResource::Accounts,
        FinanceResource::Payments,
        FinanceResource::Projects,
        FinanceResource::Requisites,
        FinanceResource::Taxes,
    ];

    /// Path segment of the `GET /v1/{resource}` endpoint.
    pub fn path(&self) -> &'static str {
        match self {
            FinanceResource::Categories => "categories",
            FinanceResource::MoneyBags => "moneybags",
            FinanceResource::Partners => "partners",
            FinanceResource::Directions => "directions",
            FinanceResource::Goods => "goods",
            FinanceResource::Deals => "deals",
            FinanceResource::Obligations => "obligations",
            FinanceResource::Employees => "employees",
            FinanceResource::Accounts => "accounts",
            FinanceResource::Payments => "payments",
            FinanceResource::Projects => "projects",
            FinanceResource::Requisites => "requisites",
            FinanceResource::Taxes => "taxes",
        }
    }

    /// Local mirror table name.
    pub fn table(&self) -> &'static str {
        match self {
            FinanceResource::Categories => "fin_category",
            FinanceResource::MoneyBags => "fin_money_bag",
            FinanceResource::Partners => "fin_partner",
            FinanceResource::Directions => "fin_direction",
            FinanceResource::Goods => "fin_goods",
            FinanceResource::Deals => "fin_deal",
            FinanceResource::Obligations => "fin_obligation",
            FinanceResource::Employees => "fin_employee",
            FinanceResource::Accounts => "fin_account",
            FinanceResource::Payments => "fin_payment",
            FinanceResource::Projects => "fin_project",
            FinanceResource::Requisites => "fin_requisite",
            FinanceResource::Taxes => "fin_tax",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceRow {
    pub id: i64,
    pub name: String,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Operational rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockBalanceRow {
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub store_name: String,
    pub product_name: String,
    pub amount: Decimal,
    pub money: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinStockRow {
    pub product_id: Uuid,
    pub department_id: Uuid,
    pub min_level: Decimal,
    pub max_level: Decimal,
}

/// One row of an OLAP report grouped by `Account.Name × Product.TopParent`.
/// `amount` is nullable upstream; a null means "skip", never "zero".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OlapRow {
    pub account_name: String,
    pub top_parent: String,
    pub product_name: String,
    pub product_id: Option<Uuid>,
    pub amount: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Sync audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Running,
    Success,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "running" => Ok(SyncStatus::Running),
            "success" => Ok(SyncStatus::Success),
            "error" => Ok(SyncStatus::Error),
            other => Err(anyhow::anyhow!("invalid sync status: {}", other)),
        }
    }
}

/// Who asked for a sync run; recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncTrigger {
    Schedule,
    Operator,
    Webhook,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncTrigger::Schedule => "schedule",
            SyncTrigger::Operator => "operator",
            SyncTrigger::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogRow {
    pub id: i64,
    pub entity_type: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub records_synced: i64,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_type_round_trips_all_sixteen() {
        assert_eq!(RootType::ALL.len(), 16);
        for rt in RootType::ALL {
            assert_eq!(RootType::parse(rt.as_str()).unwrap(), rt);
        }
    }

    #[test]
    fn root_type_rejects_unknown() {
        assert!(RootType::parse("WAREHOUSE").is_err());
    }

    #[test]
    fn finance_resources_cover_thirteen_distinct_tables() {
        assert_eq!(FinanceResource::ALL.len(), 13);
        let mut tables: Vec<_> = FinanceResource::ALL.iter().map(|r| r.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), 13, "mirror tables must not collide");
    }

    #[test]
    fn sync_status_round_trips() {
        for st in [SyncStatus::Running, SyncStatus::Success, SyncStatus::Error] {
            assert_eq!(SyncStatus::parse(st.as_str()).unwrap(), st);
        }
        assert!(SyncStatus::parse("done").is_err());
    }
}
