//! Business documents pushed back into the POS.
//!
//! Every document carries a client-generated UUID that the POS treats as an
//! idempotency key: re-POSTing the same UUID yields a single document
//! upstream, which is what makes the narrow retry window on submission safe.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Upper bound on items in any authored document.
pub const MAX_DOC_ITEMS: usize = 50;

/// One product line of a write-off, invoice, or transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocItem {
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: Decimal,
    pub measure_unit: Option<String>,
}

impl DocItem {
    /// Quantity must be positive and bounded; names must be non-empty.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.product_name.trim().is_empty() {
            anyhow::bail!("item name must be non-empty");
        }
        if self.quantity <= Decimal::ZERO {
            anyhow::bail!("quantity must be positive: {}", self.quantity);
        }
        if self.quantity > Decimal::from(100_000) {
            anyhow::bail!("quantity out of bounds: {}", self.quantity);
        }
        Ok(())
    }
}

/// Stock write-off act.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteoffDoc {
    /// Idempotency key for the POS POST.
    pub doc_uuid: Uuid,
    pub store_id: Uuid,
    pub account_id: Uuid,
    /// Free-text reason; the author's full name is appended on approval.
    pub comment: String,
    pub items: Vec<DocItem>,
}

/// Outgoing invoice (live document or materialised template).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingInvoiceDoc {
    pub doc_uuid: Uuid,
    pub store_id: Uuid,
    pub supplier_id: Uuid,
    /// NEW | PROCESSED; receiver approval emits PROCESSED.
    pub status: String,
    pub comment: String,
    pub items: Vec<DocItem>,
}

/// Internal transfer between two stores of the same restaurant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalTransferDoc {
    pub doc_uuid: Uuid,
    pub from_store_id: Uuid,
    pub to_store_id: Uuid,
    pub comment: String,
    pub items: Vec<DocItem>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(qty: Decimal) -> DocItem {
        DocItem {
            product_id: Uuid::new_v4(),
            product_name: "Лимон".to_string(),
            quantity: qty,
            measure_unit: Some("кг".to_string()),
        }
    }

    #[test]
    fn positive_quantity_passes() {
        assert!(item(dec!(0.5)).validate().is_ok());
    }

    #[test]
    fn zero_and_negative_quantities_rejected() {
        assert!(item(dec!(0)).validate().is_err());
        assert!(item(dec!(-1)).validate().is_err());
    }

    #[test]
    fn empty_name_rejected() {
        let mut it = item(dec!(1));
        it.product_name = "  ".to_string();
        assert!(it.validate().is_err());
    }

    #[test]
    fn absurd_quantity_rejected() {
        assert!(item(dec!(1000000)).validate().is_err());
    }
}
