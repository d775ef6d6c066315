//! POS reference reconcilers: table specs, mappers, and the eight-way
//! fan-out.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::Value;
use sqlx::PgPool;

use galley_clients::PosApi;
use galley_config::ProjectClock;
use galley_db::{DbValue, UpsertSpec};
use galley_schemas::SyncTrigger;

use crate::engine::{reconcile, MappedRow, RowKey, SyncOutcome};
use crate::locks::SyncLocks;
use crate::raw::{get_bool, get_decimal, get_opt_uuid, get_str, get_str_any, get_uuid};

// ---------------------------------------------------------------------------
// Table specs
// ---------------------------------------------------------------------------

const SUPPLIER: UpsertSpec = UpsertSpec {
    table: "supplier",
    columns: &["id", "name", "code", "deleted", "payload", "synced_at"],
    conflict: &["id"],
};

const DEPARTMENT: UpsertSpec = UpsertSpec {
    table: "department",
    columns: &["id", "parent_id", "name", "department_type", "payload", "synced_at"],
    conflict: &["id"],
};

const STORE: UpsertSpec = UpsertSpec {
    table: "store",
    columns: &["id", "parent_id", "name", "store_type", "payload", "synced_at"],
    conflict: &["id"],
};

const DEPARTMENT_GROUP: UpsertSpec = UpsertSpec {
    table: "department_group",
    columns: &["id", "parent_id", "department_id", "name", "payload", "synced_at"],
    conflict: &["id"],
};

const PRODUCT_GROUP: UpsertSpec = UpsertSpec {
    table: "product_group",
    columns: &["id", "parent_id", "name", "deleted", "payload", "synced_at"],
    conflict: &["id"],
};

const PRODUCT: UpsertSpec = UpsertSpec {
    table: "product",
    columns: &[
        "id",
        "parent_id",
        "name",
        "code",
        "num",
        "product_type",
        "measure_unit",
        "price",
        "deleted",
        "payload",
        "synced_at",
    ],
    conflict: &["id"],
};

// chat_user_id and department_id are deliberately absent: the bot owns
// them and sync must never overwrite.
const EMPLOYEE: UpsertSpec = UpsertSpec {
    table: "employee",
    columns: &["id", "name", "role_id", "role_code", "deleted", "payload", "synced_at"],
    conflict: &["id"],
};

const EMPLOYEE_ROLE: UpsertSpec = UpsertSpec {
    table: "employee_role",
    columns: &["id", "name", "code", "payload", "synced_at"],
    conflict: &["id"],
};

// ---------------------------------------------------------------------------
// Mappers
// ---------------------------------------------------------------------------

pub fn map_supplier(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::Str(get_str(v, "name")?),
            DbValue::OptStr(get_str(v, "code")),
            DbValue::Bool(get_bool(v, "deleted")),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_department(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::OptUuid(get_opt_uuid(v, "parentId")),
            DbValue::Str(get_str(v, "name")?),
            DbValue::Str(get_str(v, "type").unwrap_or_default()),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_store(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::OptUuid(get_opt_uuid(v, "parentId")),
            DbValue::Str(get_str(v, "name")?),
            DbValue::Str(get_str(v, "type").unwrap_or_default()),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_department_group(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::OptUuid(get_opt_uuid(v, "parentId")),
            DbValue::OptUuid(get_opt_uuid(v, "departmentId")),
            DbValue::Str(get_str(v, "name")?),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_product_group(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::OptUuid(get_opt_uuid(v, "parentId")),
            DbValue::Str(get_str(v, "name")?),
            DbValue::Bool(get_bool(v, "deleted")),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_product(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::OptUuid(get_opt_uuid(v, "parent")),
            DbValue::Str(get_str(v, "name")?),
            DbValue::OptStr(get_str(v, "code")),
            DbValue::OptStr(get_str(v, "num")),
            DbValue::Str(get_str_any(v, &["type", "productType"]).unwrap_or_default()),
            DbValue::OptStr(get_str_any(v, &["measureUnit", "mainUnit"])),
            DbValue::OptDecimal(get_decimal(v, "defaultSalePrice")),
            DbValue::Bool(get_bool(v, "deleted")),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_employee(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::Str(get_str(v, "name")?),
            DbValue::OptUuid(get_opt_uuid(v, "mainRoleId")),
            DbValue::OptStr(get_str(v, "mainRoleCode")),
            DbValue::Bool(get_bool(v, "deleted")),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

pub fn map_employee_role(v: &Value, now: DateTime<Utc>) -> Option<MappedRow> {
    let id = get_uuid(v, "id")?;
    Some((
        vec![
            DbValue::Uuid(id),
            DbValue::Str(get_str(v, "name")?),
            DbValue::OptStr(get_str(v, "code")),
            DbValue::Json(v.clone()),
            DbValue::TsUtc(now),
        ],
        RowKey::Uuid(id),
    ))
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Shared dependencies for the POS reconcilers.
pub struct PosSyncDeps {
    pub pool: PgPool,
    pub clock: ProjectClock,
    pub locks: Arc<SyncLocks>,
    pub pos: Arc<dyn PosApi>,
}

macro_rules! pos_entity {
    ($fn_name:ident, $name:literal, $spec:expr, $fetch:ident, $map:path) => {
        pub async fn $fn_name(deps: &PosSyncDeps, trigger: SyncTrigger) -> Result<SyncOutcome> {
            let now = deps.clock.now_utc();
            reconcile(
                &deps.pool,
                &deps.clock,
                &deps.locks,
                trigger,
                $name,
                &$spec,
                None,
                || async { deps.pos.$fetch().await },
                |v| $map(v, now),
            )
            .await
        }
    };
}

pos_entity!(sync_suppliers, "supplier", SUPPLIER, fetch_suppliers, map_supplier);
pos_entity!(sync_departments, "department", DEPARTMENT, fetch_departments, map_department);
pos_entity!(sync_stores, "store", STORE, fetch_stores, map_store);
pos_entity!(
    sync_department_groups,
    "department_group",
    DEPARTMENT_GROUP,
    fetch_groups,
    map_department_group
);
pos_entity!(
    sync_product_groups,
    "product_group",
    PRODUCT_GROUP,
    fetch_product_groups,
    map_product_group
);
pos_entity!(sync_products, "product", PRODUCT, fetch_products, map_product);
pos_entity!(sync_employees, "employee", EMPLOYEE, fetch_employees, map_employee);
pos_entity!(
    sync_employee_roles,
    "employee_role",
    EMPLOYEE_ROLE,
    fetch_employee_roles,
    map_employee_role
);

/// Run all eight POS reference reconcilers concurrently. Each entity
/// reports its own outcome; one failure never aborts its siblings.
pub async fn sync_all_pos(
    deps: &PosSyncDeps,
    trigger: SyncTrigger,
) -> Vec<(&'static str, Result<SyncOutcome>)> {
    type BoxedRun<'a> =
        std::pin::Pin<Box<dyn std::future::Future<Output = Result<SyncOutcome>> + Send + 'a>>;

    let runs: Vec<(&'static str, BoxedRun<'_>)> = vec![
        ("department", Box::pin(sync_departments(deps, trigger))),
        ("store", Box::pin(sync_stores(deps, trigger))),
        ("department_group", Box::pin(sync_department_groups(deps, trigger))),
        ("product_group", Box::pin(sync_product_groups(deps, trigger))),
        ("product", Box::pin(sync_products(deps, trigger))),
        ("supplier", Box::pin(sync_suppliers(deps, trigger))),
        ("employee", Box::pin(sync_employees(deps, trigger))),
        ("employee_role", Box::pin(sync_employee_roles(deps, trigger))),
    ];

    let (names, futs): (Vec<_>, Vec<_>) = runs.into_iter().unzip();
    names.into_iter().zip(join_all(futs).await).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn product_mapper_extracts_typed_fields() {
        let now = Utc::now();
        let v = json!({
            "id": "33333333-3333-3333-3333-333333333333",
            "parent": "44444444-4444-4444-4444-444444444444",
            "name": "Лимон",
            "type": "GOODS",
            "mainUnit": "кг",
            "defaultSalePrice": 250.0,
            "deleted": false
        });

        let (row, key) = map_product(&v, now).expect("maps");
        assert_eq!(row.len(), PRODUCT.columns.len());
        assert_eq!(
            key,
            RowKey::Uuid("33333333-3333-3333-3333-333333333333".parse().unwrap())
        );
    }

    #[test]
    fn records_without_id_or_name_are_dropped() {
        let now = Utc::now();
        assert!(map_product(&json!({"name": "нет id"}), now).is_none());
        assert!(map_supplier(
            &json!({"id": "33333333-3333-3333-3333-333333333333"}),
            now
        )
        .is_none());
    }

    #[test]
    fn department_mapper_tolerates_xml_string_fields() {
        let now = Utc::now();
        let v = json!({
            "id": "11111111-1111-1111-1111-111111111111",
            "parentId": "22222222-2222-2222-2222-222222222222",
            "name": "Ресторан (Центр)",
            "type": "DEPARTMENT"
        });
        let (row, _) = map_department(&v, now).expect("maps");
        assert_eq!(row.len(), DEPARTMENT.columns.len());
    }

    #[test]
    fn employee_spec_excludes_bot_owned_columns() {
        assert!(!EMPLOYEE.columns.contains(&"chat_user_id"));
        assert!(!EMPLOYEE.columns.contains(&"department_id"));
    }
}
