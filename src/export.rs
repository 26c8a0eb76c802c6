//! CSV export of per-document and combined tables.
//!
//! Every file is written to a temp file in the output directory and renamed
//! into place, so a crash mid-write never leaves a truncated table behind.

use crate::error::InvoiceError;
use crate::output::BatchOutput;
use crate::table::{InvoiceRow, COLUMNS};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Files written by [`write_batch`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    /// One file per document table, in table order.
    pub document_files: Vec<PathBuf>,
    pub combined_file: PathBuf,
    /// Rows in the combined file.
    pub rows_written: usize,
}

/// `combined_invoices_<YYYYMMDD_HHMMSS>.csv`.
pub fn combined_file_name(now: DateTime<Local>) -> String {
    format!("combined_invoices_{}.csv", now.format("%Y%m%d_%H%M%S"))
}

/// Write every table of `output` into `dir`, creating it if needed.
pub fn write_batch(
    output: &BatchOutput,
    dir: &Path,
    now: DateTime<Local>,
) -> Result<ExportSummary, InvoiceError> {
    std::fs::create_dir_all(dir).map_err(|e| InvoiceError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut used = HashSet::new();
    let mut document_files = Vec::with_capacity(output.tables.len());
    for table in &output.tables {
        let path = dir.join(document_file_name(&table.source_document, &mut used));
        write_table(&path, &table.rows)?;
        document_files.push(path);
    }

    let combined_file = dir.join(combined_file_name(now));
    write_table(&combined_file, &output.combined.rows)?;
    info!(
        "Wrote {} document tables and {}",
        document_files.len(),
        combined_file.display()
    );

    Ok(ExportSummary {
        document_files,
        combined_file,
        rows_written: output.combined.len(),
    })
}

/// `<stem>.csv`, or `<name with dots as underscores>.csv` when two documents
/// share a stem (`a.pdf` and `a.png`).
fn document_file_name(source_document: &str, used: &mut HashSet<String>) -> String {
    let stem = Path::new(source_document)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_document.to_string());
    let mut name = format!("{stem}.csv");
    if !used.insert(name.clone()) {
        name = format!("{}.csv", source_document.replace('.', "_"));
        used.insert(name.clone());
    }
    name
}

/// Write rows with the standard header to `path`, atomically.
pub fn write_table(path: &Path, rows: &[InvoiceRow]) -> Result<(), InvoiceError> {
    let write_failed = |source: std::io::Error| InvoiceError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_failed)?;

    write_rows(&mut tmp, rows).map_err(|source| InvoiceError::CsvEncodeFailed {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.flush().map_err(write_failed)?;
    tmp.persist(path).map_err(|e| write_failed(e.error))?;
    Ok(())
}

/// Write the header and every row as CSV.
pub fn write_rows<W: Write>(writer: W, rows: &[InvoiceRow]) -> Result<(), csv::Error> {
    let mut csv_writer = csv::WriterBuilder::new().from_writer(writer);
    csv_writer.write_record(COLUMNS)?;
    for row in rows {
        csv_writer.write_record(row.to_record())?;
    }
    // Check for error rather than implicitly flushing and ignoring.
    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    fn row(product: &str) -> InvoiceRow {
        InvoiceRow {
            date: NaiveDate::from_ymd_opt(2023, 6, 24),
            product: product.into(),
            quantity: Some(dec!(50)),
            unit_price: Some(dec!(7.50)),
            marked_up_price: Some(dec!(9.3750)),
            total_price: None,
            source_document: "inv.pdf".into(),
        }
    }

    #[test]
    fn csv_has_header_and_quotes_commas() {
        let mut buf = Vec::new();
        write_rows(&mut buf, &[row("Mint, fresh")]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Date,Product,Quantity,U.Price,Marked_Up_Price,Total_Price,Source_Document")
        );
        assert_eq!(
            lines.next(),
            Some("2023-06-24,\"Mint, fresh\",50,7.5,9.375,,inv.pdf")
        );
    }

    #[test]
    fn combined_name_carries_timestamp() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(combined_file_name(now), "combined_invoices_20240309_140507.csv");
    }

    #[test]
    fn colliding_stems_get_distinct_files() {
        let mut used = HashSet::new();
        assert_eq!(document_file_name("a.pdf", &mut used), "a.csv");
        assert_eq!(document_file_name("a.png", &mut used), "a_png.csv");
        assert_eq!(document_file_name("b.png", &mut used), "b.csv");
    }

    #[test]
    fn write_table_replaces_atomically() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "old").unwrap();
        write_table(&path, &[row("Basil")]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Date,Product"));
        assert!(text.contains("Basil"));
        // No temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
