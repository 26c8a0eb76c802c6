//! Pricing: fill a missing unit price from the line total and apply markup.
//!
//! `marked_up_price` is always recomputed from `unit_price`, never from a
//! previous markup, so running this stage twice gives the same table.

use crate::table::InvoiceRow;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, warn};

/// Decimal places kept on a unit price derived from `total ÷ quantity`.
pub const DERIVED_UNIT_PRICE_DP: u32 = 4;

/// Largest `|unit × quantity − total|` not reported as a mismatch.
pub const TOTAL_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Derive missing unit prices, then set `marked_up_price` on every row.
///
/// Totals are never touched: a row with a unit price and no total keeps a
/// null total. A markup that overflows `Decimal` leaves `marked_up_price`
/// null.
pub fn apply_markup(rows: Vec<InvoiceRow>, markup_rate: Decimal) -> Vec<InvoiceRow> {
    let factor = Decimal::ONE.checked_add(markup_rate);
    rows.into_iter()
        .map(|mut row| {
            if row.unit_price.is_none() {
                row.unit_price = derive_unit_price(row.quantity, row.total_price);
                if let Some(unit) = row.unit_price {
                    debug!("Derived unit price {} for '{}'", unit, row.product);
                }
            }
            row.marked_up_price = row.unit_price.and_then(|unit| {
                let marked_up = factor.and_then(|f| unit.checked_mul(f));
                if marked_up.is_none() {
                    warn!(
                        "{}: markup of {} on '{}' overflows; leaving it empty",
                        row.source_document, unit, row.product
                    );
                }
                marked_up
            });
            row
        })
        .collect()
}

/// `total ÷ quantity` when both are known and the quantity is non-zero.
pub fn derive_unit_price(quantity: Option<Decimal>, total: Option<Decimal>) -> Option<Decimal> {
    match (quantity, total) {
        (Some(qty), Some(total)) if !qty.is_zero() => total.checked_div(qty).map(|unit| {
            unit.round_dp_with_strategy(
                DERIVED_UNIT_PRICE_DP,
                RoundingStrategy::MidpointAwayFromZero,
            )
        }),
        _ => None,
    }
}

/// Count rows whose unit price × quantity disagrees with the stated total.
///
/// Mismatches are logged, not corrected; the invoice is the source of truth.
pub fn check_totals(rows: &[InvoiceRow]) -> usize {
    rows.iter()
        .filter(|row| {
            let (Some(unit), Some(qty), Some(total)) = (row.unit_price, row.quantity, row.total_price)
            else {
                return false;
            };
            let Some(expected) = unit.checked_mul(qty) else {
                return false;
            };
            let off = (expected - total).abs() > TOTAL_TOLERANCE;
            if off {
                warn!(
                    "{}: '{}' {} × {} = {}, but total is {}",
                    row.source_document, row.product, qty, unit, expected, total
                );
            }
            off
        })
        .count()
}
