//! Table assembly: per-document tables plus one combined, sorted table.

use crate::table::{CombinedTable, InvoiceRow, InvoiceTable};
use std::cmp::Ordering;

/// Merge per-document tables into a [`CombinedTable`].
///
/// Every row of every input appears exactly once. The combined rows are
/// sorted by date ascending (undated rows last), then product; the sort is
/// stable, so ties keep document order. The per-document tables are
/// returned unchanged.
pub fn assemble(tables: Vec<InvoiceTable>) -> (Vec<InvoiceTable>, CombinedTable) {
    let mut rows: Vec<InvoiceRow> = tables.iter().flat_map(|t| t.rows.iter().cloned()).collect();
    rows.sort_by(compare_rows);
    (tables, CombinedTable { rows })
}

/// Ordering used by the combined table.
pub fn compare_rows(a: &InvoiceRow, b: &InvoiceRow) -> Ordering {
    let by_date = match (a.date, b.date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date.then_with(|| a.product.cmp(&b.product))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(date: Option<(i32, u32, u32)>, product: &str, source: &str) -> InvoiceRow {
        InvoiceRow {
            date: date.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            product: product.into(),
            quantity: None,
            unit_price: None,
            marked_up_price: None,
            total_price: None,
            source_document: source.into(),
        }
    }

    #[test]
    fn combined_is_sorted_by_date_then_product() {
        let a = InvoiceTable::new(
            "a.pdf",
            vec![
                row(Some((2023, 6, 24)), "Mint", "a.pdf"),
                row(None, "Basil", "a.pdf"),
            ],
        );
        let b = InvoiceTable::new(
            "b.pdf",
            vec![
                row(Some((2023, 6, 24)), "Coriander", "b.pdf"),
                row(Some((2023, 1, 2)), "Zest", "b.pdf"),
            ],
        );
        let (tables, combined) = assemble(vec![a.clone(), b.clone()]);
        assert_eq!(tables, vec![a, b]);

        let order: Vec<&str> = combined.rows.iter().map(|r| r.product.as_str()).collect();
        assert_eq!(order, vec!["Zest", "Coriander", "Mint", "Basil"]);
    }

    #[test]
    fn ties_keep_document_order() {
        let a = InvoiceTable::new("a.pdf", vec![row(Some((2023, 1, 1)), "Bolt", "a.pdf")]);
        let b = InvoiceTable::new("b.pdf", vec![row(Some((2023, 1, 1)), "Bolt", "b.pdf")]);
        let (_, combined) = assemble(vec![a, b]);
        let sources: Vec<&str> = combined
            .rows
            .iter()
            .map(|r| r.source_document.as_str())
            .collect();
        assert_eq!(sources, vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn every_row_appears_once() {
        let tables: Vec<InvoiceTable> = (0..3)
            .map(|i| {
                let name = format!("{i}.pdf");
                let rows = (0..i + 1).map(|j| row(None, &format!("p{j}"), &name)).collect();
                InvoiceTable::new(name, rows)
            })
            .collect();
        let (_, combined) = assemble(tables);
        assert_eq!(combined.len(), 1 + 2 + 3);
    }

    #[test]
    fn empty_input_gives_empty_combined() {
        let (tables, combined) = assemble(Vec::new());
        assert!(tables.is_empty());
        assert!(combined.is_empty());
    }
}
