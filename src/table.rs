//! Validated invoice rows and the tables that hold them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Column headers of every exported table, in order.
pub const COLUMNS: [&str; 7] = [
    "Date",
    "Product",
    "Quantity",
    "U.Price",
    "Marked_Up_Price",
    "Total_Price",
    "Source_Document",
];

/// One normalised invoice line item.
///
/// After validation `product` is non-empty and not a placeholder, and at least
/// one of `unit_price` / `total_price` is a non-negative number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceRow {
    pub date: Option<NaiveDate>,
    pub product: String,
    pub quantity: Option<Decimal>,
    /// Unit price as extracted (or derived from total ÷ quantity).
    pub unit_price: Option<Decimal>,
    /// `unit_price × (1 + markup_rate)`; set by [`crate::pipeline::pricing`].
    pub marked_up_price: Option<Decimal>,
    /// Line total as extracted. Never rewritten.
    pub total_price: Option<Decimal>,
    pub source_document: String,
}

impl InvoiceRow {
    /// Render the row as CSV cells matching [`COLUMNS`].
    pub fn to_record(&self) -> [String; 7] {
        [
            self.date
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            self.product.clone(),
            fmt_decimal(self.quantity),
            fmt_decimal(self.unit_price),
            fmt_decimal(self.marked_up_price),
            fmt_decimal(self.total_price),
            self.source_document.clone(),
        ]
    }
}

fn fmt_decimal(value: Option<Decimal>) -> String {
    value.map(|d| d.normalize().to_string()).unwrap_or_default()
}

/// Rows extracted from one source document, in extraction order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceTable {
    pub source_document: String,
    pub rows: Vec<InvoiceRow>,
}

impl InvoiceTable {
    pub fn new(source_document: impl Into<String>, rows: Vec<InvoiceRow>) -> Self {
        Self {
            source_document: source_document.into(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Rows of every document in a batch, sorted by `(date, product)`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CombinedTable {
    pub rows: Vec<InvoiceRow>,
}

impl CombinedTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn record_formats_nulls_as_empty_cells() {
        let row = InvoiceRow {
            date: NaiveDate::from_ymd_opt(2023, 6, 24),
            product: "BD2 Coriander Eng".into(),
            quantity: None,
            unit_price: Some(dec!(7.50)),
            marked_up_price: Some(dec!(9.3750)),
            total_price: None,
            source_document: "inv.pdf".into(),
        };
        assert_eq!(
            row.to_record(),
            [
                "2023-06-24".to_string(),
                "BD2 Coriander Eng".into(),
                String::new(),
                "7.5".into(),
                "9.375".into(),
                String::new(),
                "inv.pdf".into(),
            ]
        );
    }
}
