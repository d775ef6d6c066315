//! Min/max stock level import.
//!
//! The tab carries one row per (product, department); malformed rows are
//! dropped with a warning rather than failing the whole import.

use rust_decimal::Decimal;
use tracing::warn;
use uuid::Uuid;

use galley_schemas::MinStockRow;

use crate::SheetRecord;

const COL_PRODUCT: &str = "product_id";
const COL_DEPARTMENT: &str = "department_id";
const COL_MIN: &str = "min";
const COL_MAX: &str = "max";

pub fn parse_min_stock_records(records: &[SheetRecord]) -> Vec<MinStockRow> {
    let mut out = Vec::with_capacity(records.len());

    for (i, rec) in records.iter().enumerate() {
        let parsed = (|| -> Option<MinStockRow> {
            let product_id: Uuid = rec.get(COL_PRODUCT)?.trim().parse().ok()?;
            let department_id: Uuid = rec.get(COL_DEPARTMENT)?.trim().parse().ok()?;
            let min_level: Decimal = parse_decimal(rec.get(COL_MIN)?)?;
            let max_level: Decimal = parse_decimal(rec.get(COL_MAX)?)?;
            if min_level < Decimal::ZERO || max_level < min_level {
                return None;
            }
            Some(MinStockRow {
                product_id,
                department_id,
                min_level,
                max_level,
            })
        })();

        match parsed {
            Some(row) => out.push(row),
            None => warn!(row = i + 2, "min/max row dropped as malformed"),
        }
    }

    out
}

/// Operators type decimals with either separator.
fn parse_decimal(raw: &str) -> Option<Decimal> {
    raw.trim().replace(',', ".").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rec(product: &str, dept: &str, min: &str, max: &str) -> SheetRecord {
        [
            (COL_PRODUCT.to_string(), product.to_string()),
            (COL_DEPARTMENT.to_string(), dept.to_string()),
            (COL_MIN.to_string(), min.to_string()),
            (COL_MAX.to_string(), max.to_string()),
        ]
        .into_iter()
        .collect()
    }

    const P: &str = "11111111-1111-1111-1111-111111111111";
    const D: &str = "22222222-2222-2222-2222-222222222222";

    #[test]
    fn parses_comma_decimals() {
        let rows = parse_min_stock_records(&[rec(P, D, "1,5", "10")]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].min_level, dec!(1.5));
        assert_eq!(rows[0].max_level, dec!(10));
    }

    #[test]
    fn drops_malformed_and_inverted_rows() {
        let rows = parse_min_stock_records(&[
            rec("not-a-uuid", D, "1", "2"),
            rec(P, D, "5", "2"), // max below min
            rec(P, D, "-1", "2"),
            rec(P, D, "1", "2"),
        ]);
        assert_eq!(rows.len(), 1);
    }
}
