//! Output types: per-document outcomes, batch statistics, and the batch
//! result returned by [`crate::extract::extract_directory`].

use crate::error::DocumentError;
use crate::table::{CombinedTable, InvoiceTable};
use serde::Serialize;
use std::path::PathBuf;

/// Complete result of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutput {
    /// One table per document that produced rows, in discovery order.
    pub tables: Vec<InvoiceTable>,
    /// Every row of `tables`, sorted by `(date, product)`.
    pub combined: CombinedTable,
    /// One entry per discovered document, including failures.
    pub documents: Vec<DocumentResult>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Documents that failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentError> {
        self.documents.iter().filter_map(|d| d.error.as_ref())
    }
}

/// What happened to one document.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentResult {
    /// 1-based position in discovery order.
    pub index: usize,
    pub source_document: String,
    pub path: PathBuf,
    /// Rows kept after validation.
    pub rows_extracted: usize,
    /// Rows removed by validation (missing product, placeholder, no price).
    pub rows_dropped: usize,
    /// Model retries used (0 = first attempt succeeded).
    pub retries: u32,
    /// Rows whose unit price × quantity disagrees with the stated total.
    pub total_mismatches: usize,
    pub duration_ms: u64,
    /// `Some` if the document produced no table.
    pub error: Option<DocumentError>,
}

impl DocumentResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate statistics for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Supported documents found in the input directory.
    pub total_documents: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Files in the input directory with an unsupported extension.
    pub skipped_files: usize,
    pub rows_extracted: usize,
    pub rows_dropped: usize,
    pub total_retries: u32,
    pub total_mismatches: usize,
    /// Wall-clock time for the whole batch.
    pub total_duration_ms: u64,
}

impl BatchStats {
    /// Sum per-document counters. `total_duration_ms` is left for the caller.
    pub fn from_results(results: &[DocumentResult], skipped_files: usize) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total_documents: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            skipped_files,
            rows_extracted: results.iter().map(|r| r.rows_extracted).sum(),
            rows_dropped: results.iter().map(|r| r.rows_dropped).sum(),
            total_retries: results.iter().map(|r| r.retries).sum(),
            total_mismatches: results.iter().map(|r| r.total_mismatches).sum(),
            total_duration_ms: 0,
        }
    }
}
