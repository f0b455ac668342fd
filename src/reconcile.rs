//! Receipt reconciliation against an approved request
use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::ports::ExtractedDocument;
use crate::request::{LineItem, Money};

/// One cent of rounding slack on every comparison.
pub fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub is_valid: bool,
    pub discrepancies: Vec<String>,
    pub extracted_data: ExtractedDocument,
}

/// Compares a receipt with what the request recorded. Read-only.
///
/// An extracted total of zero means nothing was read, so the amount check is
/// skipped; the item check only runs when both sides list items. Names match
/// case-insensitively and exactly.
pub fn reconcile(
    amount: Money,
    items: &[LineItem],
    extracted: &ExtractedDocument,
) -> ReconciliationReport {
    let mut discrepancies = vec![];

    if !extracted.total_amount.is_zero() && !within_tolerance(amount, extracted.total_amount) {
        discrepancies.push(format!(
            "Amount mismatch: request ${amount}, receipt ${}",
            extracted.total_amount
        ));
    }

    if !items.is_empty() && !extracted.items.is_empty() {
        let receipt_prices: HashMap<String, Money> = extracted
            .items
            .iter()
            .map(|item| (item.name.to_lowercase(), item.price))
            .collect();

        for (name, total) in request_totals(items) {
            match receipt_prices.get(&name) {
                None => discrepancies.push(format!("Item \"{name}\" not found in receipt")),
                Some(price) if !within_tolerance(total, *price) => discrepancies.push(format!(
                    "Price mismatch for \"{name}\": request ${total}, receipt ${price}"
                )),
                Some(_) => {}
            }
        }
    }

    ReconciliationReport {
        is_valid: discrepancies.is_empty(),
        discrepancies,
        extracted_data: extracted.clone(),
    }
}

// an overflowing difference is never within tolerance
fn within_tolerance(left: Money, right: Money) -> bool {
    left.distance(&right).is_some_and(|d| d <= tolerance())
}

// lowercased name -> item total, first-seen order, a repeated name keeps the last total
fn request_totals(items: &[LineItem]) -> Vec<(String, Money)> {
    let mut totals: Vec<(String, Money)> = Vec::with_capacity(items.len());
    for item in items {
        let key = item.name.to_lowercase();
        match totals.iter_mut().find(|(name, _)| *name == key) {
            Some(entry) => entry.1 = item.total(),
            None => totals.push((key, item.total())),
        }
    }
    totals
}
