//! Incoming-invoice intake from photos.
//!
//! Vision extraction is an opaque collaborator: photos in, structured
//! documents plus warnings out. This module owns the staging writes, the
//! sum check, and the chat flow around them. Known upstream quirk: a VAT
//! rate absent from the mapping table (the "22%" case) must not raise a
//! sum-mismatch warning — the rate-unknown flag is authoritative.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;

use galley_db::{insert_ocr_document, insert_ocr_item};

use crate::menu::user_error;
use crate::service::FlowDeps;

/// Absolute tolerance for OCR-noise in money sums.
pub const SUM_TOLERANCE: Decimal = dec!(0.5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrItem {
    pub name: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub total: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrDocument {
    pub supplier: String,
    pub items: Vec<OcrItem>,
    pub total: Option<Decimal>,
    /// Set when the VAT rate is missing from the mapping table.
    pub rate_unknown: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResult {
    pub documents: Vec<OcrDocument>,
    pub warnings: Vec<String>,
}

/// The opaque `photo → structured document` function.
#[async_trait]
pub trait OcrExtractor: Send + Sync {
    async fn extract(&self, photos: &[Vec<u8>]) -> Result<OcrResult>;
}

// ---------------------------------------------------------------------------
// Sum check
// ---------------------------------------------------------------------------

/// Warnings for items whose `price × quantity` disagrees with the stated
/// line total beyond the tolerance. Suppressed entirely when the VAT rate
/// is unknown — the mismatch is then expected, not evidence of bad OCR.
pub fn sum_mismatch_warnings(doc: &OcrDocument) -> Vec<String> {
    if doc.rate_unknown {
        return Vec::new();
    }

    let mut warnings = Vec::new();
    for item in &doc.items {
        let (Some(price), Some(total)) = (item.price, item.total) else {
            continue;
        };
        let expected = price * item.quantity;
        if (expected - total).abs() > SUM_TOLERANCE {
            warnings.push(format!(
                "«{}»: {} × {} = {}, в накладной {}",
                item.name,
                price.normalize(),
                item.quantity.normalize(),
                expected.normalize(),
                total.normalize()
            ));
        }
    }
    warnings
}

// ---------------------------------------------------------------------------
// Chat flow
// ---------------------------------------------------------------------------

pub async fn entry(deps: &Arc<FlowDeps>, _user: i64, chat: i64) -> Result<()> {
    deps.notify(
        chat,
        "📸 Пришлите фото накладной. Распознанный документ попадёт в черновики.",
    )
    .await;
    Ok(())
}

pub async fn on_callback(_deps: &Arc<FlowDeps>, _user: i64, _chat: i64, _rest: &str) -> Result<()> {
    Ok(())
}

/// Run extraction on received photos and stage the results.
pub async fn intake_photos(deps: &Arc<FlowDeps>, chat: i64, photos: Vec<Vec<u8>>) -> Result<()> {
    let result = match deps.ocr.extract(&photos).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "ocr extraction failed");
            deps.notify(chat, &user_error("Не удалось распознать накладную")).await;
            return Ok(());
        }
    };

    for doc in &result.documents {
        let mut warnings = result.warnings.clone();
        warnings.extend(sum_mismatch_warnings(doc));

        let document_id = insert_ocr_document(
            &deps.pool,
            deps.clock.now_utc(),
            chat,
            &doc.supplier,
            doc.total,
            doc.rate_unknown,
            &json!(warnings),
        )
        .await?;

        for item in &doc.items {
            insert_ocr_item(
                &deps.pool,
                document_id,
                &item.name,
                item.quantity,
                item.price,
                item.total,
                None,
            )
            .await?;
        }

        let mut summary = format!(
            "📄 «{}»: {} поз., итого {}\n",
            doc.supplier,
            doc.items.len(),
            doc.total.map(|t| t.normalize().to_string()).unwrap_or_else(|| "—".to_string())
        );
        if !warnings.is_empty() {
            summary.push_str(&format!("⚠️ Предупреждений: {}\n", warnings.len()));
        }
        deps.notify(chat, &summary).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: &str, qty: &str, total: &str) -> OcrItem {
        OcrItem {
            name: "Молоко".to_string(),
            quantity: qty.parse().unwrap(),
            price: Some(price.parse().unwrap()),
            total: Some(total.parse().unwrap()),
        }
    }

    #[test]
    fn matching_sums_produce_no_warnings() {
        let doc = OcrDocument {
            supplier: "ООО Поставщик".to_string(),
            items: vec![item("100.00", "2", "200.00"), item("99.99", "1", "100.30")],
            total: None,
            rate_unknown: false,
        };
        // The second line is off by 0.31 — inside the 0.5 tolerance.
        assert!(sum_mismatch_warnings(&doc).is_empty());
    }

    #[test]
    fn real_mismatch_is_flagged() {
        let doc = OcrDocument {
            supplier: "ООО Поставщик".to_string(),
            items: vec![item("100.00", "2", "230.00")],
            total: None,
            rate_unknown: false,
        };
        assert_eq!(sum_mismatch_warnings(&doc).len(), 1);
    }

    #[test]
    fn unknown_rate_suppresses_mismatch_warnings() {
        let doc = OcrDocument {
            supplier: "ООО Поставщик".to_string(),
            items: vec![item("100.00", "2", "244.00")], // 22% off
            total: None,
            rate_unknown: true,
        };
        assert!(sum_mismatch_warnings(&doc).is_empty());
    }
}
