//! Daily exports: product catalogue, permission matrix columns, and the
//! export-group configuration read.

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use galley_schemas::ProductRow;

use crate::{
    PermissionMatrix, SheetClient, GRANT_MARK, TAB_CATALOGUE, TAB_EXPORT_GROUPS, TAB_PERMISSIONS,
    USER_ID_COLUMN,
};

const COL_GROUP_ID: &str = "group_id";

/// Configured roots of the product hierarchy whose descendants are in
/// scope for exports and item search.
pub async fn read_export_groups(sheets: &dyn SheetClient) -> Result<Vec<Uuid>> {
    let records = sheets.read_records(TAB_EXPORT_GROUPS).await?;
    Ok(records
        .iter()
        .filter_map(|rec| rec.get(COL_GROUP_ID)?.trim().parse().ok())
        .collect())
}

/// Write the product catalogue tab: one row per non-deleted product inside
/// the export groups. The id column is hidden — operators work with names.
pub async fn export_catalogue(
    sheets: &dyn SheetClient,
    products: &[ProductRow],
    in_scope: &HashSet<Uuid>,
) -> Result<usize> {
    let header = vec![
        "id".to_string(),
        "Наименование".to_string(),
        "Ед. изм.".to_string(),
        "Тип".to_string(),
    ];

    let rows: Vec<Vec<String>> = products
        .iter()
        .filter(|p| !p.deleted && in_scope.contains(&p.id))
        .map(|p| {
            vec![
                p.id.to_string(),
                p.name.clone(),
                p.measure_unit.clone().unwrap_or_default(),
                p.product_type.clone(),
            ]
        })
        .collect();

    sheets.write_records(TAB_CATALOGUE, &header, &rows).await?;
    sheets.hide_column(TAB_CATALOGUE, "id").await?;
    Ok(rows.len())
}

/// Rewrite the permission matrix so it carries one column per registered
/// capability token. Existing grants are preserved; tokens added to the
/// lookup tables since the last export appear as fresh (empty) columns.
pub async fn export_permission_matrix(
    sheets: &dyn SheetClient,
    capabilities: &[&str],
    existing: &PermissionMatrix,
    user_ids: &[i64],
) -> Result<()> {
    let mut header = vec![USER_ID_COLUMN.to_string()];
    header.extend(capabilities.iter().map(|c| c.to_string()));

    let rows: Vec<Vec<String>> = user_ids
        .iter()
        .map(|&uid| {
            let mut row = vec![uid.to_string()];
            for cap in capabilities {
                row.push(if existing.has(uid, cap) {
                    GRANT_MARK.to_string()
                } else {
                    String::new()
                });
            }
            row
        })
        .collect();

    sheets.write_records(TAB_PERMISSIONS, &header, &rows).await?;
    for cap in capabilities {
        sheets
            .set_dropdown(TAB_PERMISSIONS, cap, &[GRANT_MARK.to_string(), String::new()])
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SheetRecord;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSheet {
        written: Mutex<Vec<(String, Vec<String>, Vec<Vec<String>>)>>,
        hidden: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl SheetClient for RecordingSheet {
        async fn read_records(&self, _tab: &str) -> Result<Vec<SheetRecord>> {
            Ok(vec![])
        }

        async fn write_records(
            &self,
            tab: &str,
            header: &[String],
            rows: &[Vec<String>],
        ) -> Result<()> {
            self.written
                .lock()
                .unwrap()
                .push((tab.to_string(), header.to_vec(), rows.to_vec()));
            Ok(())
        }

        async fn set_dropdown(&self, _: &str, _: &str, _: &[String]) -> Result<()> {
            Ok(())
        }

        async fn hide_column(&self, tab: &str, column: &str) -> Result<()> {
            self.hidden
                .lock()
                .unwrap()
                .push((tab.to_string(), column.to_string()));
            Ok(())
        }
    }

    fn product(id: Uuid, name: &str, deleted: bool) -> ProductRow {
        ProductRow {
            id,
            parent_id: None,
            name: name.to_string(),
            code: None,
            num: None,
            product_type: "GOODS".to_string(),
            measure_unit: Some("шт".to_string()),
            price: None,
            deleted,
            payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn catalogue_export_filters_deleted_and_out_of_scope() {
        let sheet = RecordingSheet::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let products = vec![
            product(a, "Лимон", false),
            product(b, "Старый товар", true),
            product(c, "Вне выгрузки", false),
        ];
        let in_scope: HashSet<Uuid> = [a, b].into_iter().collect();

        let n = export_catalogue(&sheet, &products, &in_scope).await.unwrap();
        assert_eq!(n, 1);

        let written = sheet.written.lock().unwrap();
        assert_eq!(written[0].0, TAB_CATALOGUE);
        assert_eq!(written[0].2.len(), 1);
        assert_eq!(written[0].2[0][1], "Лимон");

        let hidden = sheet.hidden.lock().unwrap();
        assert_eq!(hidden[0], (TAB_CATALOGUE.to_string(), "id".to_string()));
    }

    #[tokio::test]
    async fn matrix_export_adds_new_capability_columns_preserving_grants() {
        let sheet = RecordingSheet::default();
        let existing = PermissionMatrix::from_records(&[[
            (USER_ID_COLUMN.to_string(), "777".to_string()),
            ("writeoff".to_string(), GRANT_MARK.to_string()),
        ]
        .into_iter()
        .collect()]);

        export_permission_matrix(&sheet, &["writeoff", "requests"], &existing, &[777, 888])
            .await
            .unwrap();

        let written = sheet.written.lock().unwrap();
        let (_, header, rows) = &written[0];
        assert_eq!(header, &["user_id", "writeoff", "requests"]);
        assert_eq!(rows[0], vec!["777", GRANT_MARK, ""]);
        assert_eq!(rows[1], vec!["888", "", ""]);
    }
}
