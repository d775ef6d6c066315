//! Nightly negative-consumable auto-transfer.
//!
//! One OLAP fetch grouped by `Account.Name × Product.TopParent`, filtered
//! to the configured consumables group. For every source store (the
//! "Хоз. товары (…)" pattern) holding a negative final balance, an
//! internal transfer of the absolute quantity is emitted to each target
//! prefix (bar, kitchen) of the same restaurant. A null amount means
//! "skip", never "zero or more".

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use galley_db::{store_by_name, sync_log_fail, sync_log_finish, sync_log_start};
use galley_schemas::{DocItem, InternalTransferDoc, OlapRow, SyncTrigger};
use galley_sync::raw::get_decimal;

use crate::service::FlowDeps;

const JOB_NAME: &str = "negative_transfer";

// ---------------------------------------------------------------------------
// Store naming
// ---------------------------------------------------------------------------

/// Split a store name of the form `"TYPE (NAME)"` into its segment prefix
/// and restaurant name.
pub fn parse_store_name(name: &str) -> Option<(&str, &str)> {
    let open = name.find('(')?;
    let close = name.rfind(')')?;
    if close <= open + 1 {
        return None;
    }
    let prefix = name[..open].trim();
    let restaurant = name[open + 1..close].trim();
    if prefix.is_empty() || restaurant.is_empty() {
        return None;
    }
    Some((prefix, restaurant))
}

// ---------------------------------------------------------------------------
// OLAP mapping
// ---------------------------------------------------------------------------

pub fn map_olap_row(v: &Value) -> Option<OlapRow> {
    let account_name = v
        .get("Account.Name")
        .or_else(|| v.get("account"))
        .and_then(|x| x.as_str())?
        .to_string();
    let top_parent = v
        .get("Product.TopParent")
        .or_else(|| v.get("topParent"))
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string();
    let product_name = v
        .get("Product.Name")
        .or_else(|| v.get("product"))
        .and_then(|x| x.as_str())
        .unwrap_or_default()
        .to_string();
    let product_id = v
        .get("Product.Id")
        .or_else(|| v.get("productId"))
        .and_then(|x| x.as_str())
        .and_then(|s| Uuid::parse_str(s).ok());
    // Null stays None: "no data" must not read as a balance. Decimal
    // extraction goes through the shared reader, never through f64.
    let amount = get_decimal(v, "Amount").or_else(|| get_decimal(v, "amount"));

    Some(OlapRow {
        account_name,
        top_parent,
        product_name,
        product_id,
        amount,
    })
}

/// The transfers a row set implies: `(source store name, restaurant,
/// items)` per source store with at least one negative consumable.
pub fn plan_transfers(
    rows: &[OlapRow],
    consumables_group: &str,
    source_prefix: &str,
) -> Vec<(String, String, Vec<DocItem>)> {
    let mut by_store: HashMap<String, (String, Vec<DocItem>)> = HashMap::new();

    for row in rows {
        if row.top_parent != consumables_group {
            continue;
        }
        // Null amount: skip the row outright.
        let Some(amount) = row.amount else { continue };
        if amount >= Decimal::ZERO {
            continue;
        }
        let Some((prefix, restaurant)) = parse_store_name(&row.account_name) else {
            continue;
        };
        if prefix != source_prefix {
            continue;
        }
        let Some(product_id) = row.product_id else { continue };

        by_store
            .entry(row.account_name.clone())
            .or_insert_with(|| (restaurant.to_string(), Vec::new()))
            .1
            .push(DocItem {
                product_id,
                product_name: row.product_name.clone(),
                quantity: -amount,
                measure_unit: None,
            });
    }

    let mut out: Vec<(String, String, Vec<DocItem>)> = by_store
        .into_iter()
        .map(|(store, (restaurant, items))| (store, restaurant, items))
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

pub async fn run_negative_transfer(deps: &Arc<FlowDeps>) -> Result<()> {
    let log_id = sync_log_start(
        &deps.pool,
        JOB_NAME,
        deps.clock.now_utc(),
        SyncTrigger::Schedule,
    )
    .await?;

    let request = json!({
        "reportType": "TRANSACTIONS",
        "groupByRowFields": ["Account.Name", "Product.TopParent", "Product.Name", "Product.Id"],
        "aggregateFields": ["Amount"],
        "filters": {
            "Product.TopParent": {
                "filterType": "IncludeValues",
                "values": [deps.config.consumables_group]
            }
        }
    });

    let raws = match deps.pos.fetch_olap_transactions(&request).await {
        Ok(raws) => raws,
        Err(e) => {
            let msg = e.to_string();
            warn!(error = %msg, "negative transfer olap fetch failed");
            sync_log_fail(&deps.pool, log_id, deps.clock.now_utc(), &msg).await?;
            return Ok(());
        }
    };

    let rows: Vec<OlapRow> = raws.iter().filter_map(map_olap_row).collect();
    let plan = plan_transfers(
        &rows,
        &deps.config.consumables_group,
        &deps.config.transfer_source_prefix,
    );

    let mut sent = 0i64;
    let mut report = String::from("🌙 Ночной перенос расходников:\n");

    for (source_name, restaurant, items) in plan {
        let Some(source) = store_by_name(&deps.pool, &source_name).await? else {
            warn!(store = %source_name, "source store missing from mirror");
            continue;
        };

        for target_prefix in &deps.config.transfer_target_prefixes {
            let target_name = format!("{target_prefix} ({restaurant})");
            let Some(target) = store_by_name(&deps.pool, &target_name).await? else {
                continue;
            };

            let doc = InternalTransferDoc {
                doc_uuid: Uuid::new_v4(),
                from_store_id: source.id,
                to_store_id: target.id,
                comment: format!("Автоперенос отрицательных остатков ({restaurant})"),
                items: items.clone(),
            };

            match deps.pos.send_internal_transfer(&doc, deps.clock.today()).await {
                Ok(()) => {
                    sent += 1;
                    report.push_str(&format!(
                        "• {} → {}: {} поз.\n",
                        source_name,
                        target_name,
                        doc.items.len()
                    ));
                }
                Err(e) => {
                    warn!(target = %target_name, error = %e, "transfer submit failed");
                    report.push_str(&format!("• {target_name}: ошибка отправки\n"));
                }
            }
        }
    }

    {
        let mut conn = deps.pool.acquire().await?;
        sync_log_finish(&mut conn, log_id, deps.clock.now_utc(), sent).await?;
    }

    if sent == 0 {
        report.push_str("Отрицательных остатков нет.\n");
    }
    for admin in deps.roles.admin_ids().await? {
        deps.notify(admin, &report).await;
    }

    info!(documents = sent, "negative transfer finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn store_name_pattern_parses() {
        assert_eq!(
            parse_store_name("Хоз. товары (Центр)"),
            Some(("Хоз. товары", "Центр"))
        );
        assert_eq!(parse_store_name("Бар (Северный)"), Some(("Бар", "Северный")));
        assert_eq!(parse_store_name("Центральный склад"), None);
        assert_eq!(parse_store_name("(Центр)"), None);
    }

    fn olap(store: &str, product: u128, amount: Option<Decimal>) -> OlapRow {
        OlapRow {
            account_name: store.to_string(),
            top_parent: "Расходные материалы".to_string(),
            product_name: format!("p{product}"),
            product_id: Some(Uuid::from_u128(product)),
            amount,
        }
    }

    #[test]
    fn only_negative_consumables_from_source_prefix_are_planned() {
        let rows = vec![
            olap("Хоз. товары (Центр)", 1, Some(dec!(-3))),
            olap("Хоз. товары (Центр)", 2, Some(dec!(5))),
            olap("Бар (Центр)", 3, Some(dec!(-2))),
            olap("Хоз. товары (Север)", 4, None), // null amount: skip
        ];

        let plan = plan_transfers(&rows, "Расходные материалы", "Хоз. товары");
        assert_eq!(plan.len(), 1);
        let (store, restaurant, items) = &plan[0];
        assert_eq!(store, "Хоз. товары (Центр)");
        assert_eq!(restaurant, "Центр");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, dec!(3), "absolute quantity");
    }

    #[test]
    fn foreign_top_parent_is_ignored() {
        let mut row = olap("Хоз. товары (Центр)", 1, Some(dec!(-1)));
        row.top_parent = "Продукты".to_string();
        assert!(plan_transfers(&[row], "Расходные материалы", "Хоз. товары").is_empty());
    }

    #[test]
    fn olap_mapper_keeps_null_amount_as_none() {
        let v = json!({
            "Account.Name": "Хоз. товары (Центр)",
            "Product.TopParent": "Расходные материалы",
            "Product.Name": "Перчатки",
            "Product.Id": "11111111-1111-1111-1111-111111111111",
            "Amount": null
        });
        let row = map_olap_row(&v).unwrap();
        assert_eq!(row.amount, None);
    }
}
