//! Built-in purchase order generator backed by the document tree
use std::fmt::Write;

use async_trait::async_trait;

use crate::error::GenerationFailure;
use crate::ports::{Document, DocumentGenerator, PurchaseOrderInput};
use crate::request::DocumentRef;
use crate::store::Store;

// vendor details are not carried on the request yet
const VENDOR_PLACEHOLDER: &str = "Extracted from Proforma";

/// Renders a plain-text purchase order and stores it content-addressed.
#[derive(Clone)]
pub struct StoredPurchaseOrderGenerator {
    store: Store,
}

impl StoredPurchaseOrderGenerator {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

pub fn po_number(sequence: u64) -> String {
    format!("PO-{sequence:04}")
}

pub fn render_purchase_order(
    number: &str,
    order: &PurchaseOrderInput,
) -> Result<String, std::fmt::Error> {
    let mut out = String::new();

    writeln!(out, "PURCHASE ORDER")?;
    writeln!(out)?;
    writeln!(out, "{:<14}{}", "PO Number:", number)?;
    writeln!(
        out,
        "{:<14}{}",
        "Date:",
        order.created_at.to_datetime_utc().format("%Y-%m-%d")
    )?;
    writeln!(out, "{:<14}{}", "Vendor:", VENDOR_PLACEHOLDER)?;
    writeln!(out, "{:<14}{}", "Requested By:", order.requester_name)?;
    writeln!(out, "{:<14}${}", "Amount:", order.amount)?;
    writeln!(out, "{:<14}{}", "Request:", order.request_id)?;

    if !order.items.is_empty() {
        writeln!(out)?;
        writeln!(out, "{:<30}{:>10}{:>14}{:>14}", "Item", "Quantity", "Price", "Total")?;
        for item in &order.items {
            writeln!(
                out,
                "{:<30}{:>10}{:>14}{:>14}",
                item.name,
                item.quantity,
                format!("${}", item.unit_price),
                format!("${}", item.total())
            )?;
        }
    }

    Ok(out)
}

#[async_trait]
impl DocumentGenerator for StoredPurchaseOrderGenerator {
    async fn generate_purchase_order(
        &self,
        order: &PurchaseOrderInput,
    ) -> Result<DocumentRef, GenerationFailure> {
        let number = po_number(self.store.next_sequence()?);
        let text = render_purchase_order(&number, order)
            .map_err(|err| GenerationFailure::Rendering(err.to_string()))?;

        let document = Document::new(format!("po_{}.txt", order.request_id), text.into_bytes());
        let reference = self.store.put_document(&document)?;

        tracing::info!(
            request_id = %order.request_id,
            po_number = %number,
            reference = %reference,
            "purchase order generated"
        );

        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::request::{LineItem, Money, TimeStamp};

    fn order() -> PurchaseOrderInput {
        PurchaseOrderInput {
            request_id: "request_1abc".into(),
            created_at: TimeStamp::new_with(2025, 3, 14, 9, 0, 0).unwrap(),
            requester_name: "Sam Staff".into(),
            amount: Money::from_cents(100_000),
            items: vec![LineItem::new("Monitor", Money::from_cents(25_000), 4)],
        }
    }

    #[test]
    fn renders_header_and_items() {
        let text = render_purchase_order("PO-0007", &order()).unwrap();

        assert!(text.starts_with("PURCHASE ORDER"));
        assert!(text.contains("PO-0007"));
        assert!(text.contains("2025-03-14"));
        assert!(text.contains("Sam Staff"));
        assert!(text.contains("$1000.00"));
        assert!(text.contains("Monitor"));
        assert!(text.contains("$250.00"));
    }

    #[tokio::test]
    async fn generated_order_is_stored() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let db = Arc::new(sled::open(temp_dir.path().join("po.db"))?);
        let store = Store::new(db)?;
        let generator = StoredPurchaseOrderGenerator::new(store.clone());

        let first = generator.generate_purchase_order(&order()).await?;
        let second = generator.generate_purchase_order(&order()).await?;

        // each generation draws a new PO number
        assert_ne!(first, second);

        let stored = store.get_document(&first)?.expect("document stored");
        assert_eq!(stored.file_name, "po_request_1abc.txt");
        assert!(String::from_utf8(stored.content)?.contains("PO-"));

        Ok(())
    }
}
