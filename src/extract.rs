//! Eager (whole-batch) extraction entry points.
//!
//! This module provides the simpler API: process every document, then return
//! all tables at once. Use [`crate::stream::extract_stream`] instead when you
//! want each document's table as soon as it is ready.
//!
//! Per document the work is:
//!
//! ```text
//! load ──▶ invoke_with_retry ──▶ parse ──▶ normalize ──▶ validate ──▶ markup
//! ```
//!
//! Documents share nothing until the final merge, so they run concurrently
//! (`buffer_unordered(concurrency)`); the merge happens once, on this task,
//! after every document has finished.

use crate::config::ExtractionConfig;
use crate::error::{DocumentError, InvoiceError};
use crate::export::{self, ExportSummary};
use crate::output::{BatchOutput, BatchStats, DocumentResult};
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::llm::{self, VisionModel};
use crate::pipeline::{assemble, normalize, parse, pricing, validate};
use crate::prompts::DEFAULT_EXTRACTION_PROMPT;
use crate::table::InvoiceTable;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Rows extracted from one response, before assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub table: InvoiceTable,
    pub rows_dropped: usize,
    pub total_mismatches: usize,
}

/// Extract line items from every supported document in a directory.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(BatchOutput)` when at least one document produced rows, even if
/// others failed (check `output.stats.failed` and `output.documents`).
///
/// # Errors
/// Returns `Err(InvoiceError)` only for fatal errors:
/// - input directory missing or unreadable
/// - no supported documents in it
/// - no vision provider configured
/// - every document failed
pub async fn extract_directory(
    input_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceError> {
    let input_dir = input_dir.as_ref();
    info!("Starting extraction: {}", input_dir.display());

    let found = input::discover_documents(input_dir)?;
    if found.documents.is_empty() {
        return Err(InvoiceError::NoDocuments {
            path: input_dir.to_path_buf(),
        });
    }
    let jobs = found
        .documents
        .into_iter()
        .map(|source| Job { source, bytes: None })
        .collect();
    run_batch(jobs, found.skipped.len(), config).await
}

/// Extract line items from a single PDF or image file.
///
/// Returns a batch of one so per-document statistics are available; a
/// failed document surfaces as [`InvoiceError::AllDocumentsFailed`].
pub async fn extract_document(
    path: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceError> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(InvoiceError::InputNotFound {
            path: path.to_path_buf(),
        });
    }
    let source = SourceDocument::from_path(path).ok_or_else(|| InvoiceError::NoDocuments {
        path: path.to_path_buf(),
    })?;
    run_batch(vec![Job { source, bytes: None }], 0, config).await
}

/// Extract line items from a document already in memory.
///
/// `file_name` decides the content kind (by extension) and becomes the
/// rows' `source_document`.
///
/// # Example
/// ```rust,no_run
/// use invoice_extract::{extract_bytes, ExtractionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("invoice-0042.pdf")?;
/// let output = extract_bytes(bytes, "invoice-0042.pdf", &ExtractionConfig::default()).await?;
/// for row in &output.combined.rows {
///     println!("{} {:?}", row.product, row.marked_up_price);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_bytes(
    bytes: Vec<u8>,
    file_name: &str,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceError> {
    let source = SourceDocument::from_path(file_name).ok_or_else(|| InvoiceError::NoDocuments {
        path: file_name.into(),
    })?;
    run_batch(
        vec![Job {
            source,
            bytes: Some(bytes),
        }],
        0,
        config,
    )
    .await
}

/// Synchronous wrapper around [`extract_directory`].
///
/// Creates a temporary tokio runtime internally.
pub fn extract_sync(
    input_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| InvoiceError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(extract_directory(input_dir, config))
}

/// Extract a directory and write every table as CSV into `output_dir`.
///
/// Writes `<stem>.csv` per document and one
/// `combined_invoices_<YYYYMMDD_HHMMSS>.csv`; each file is written
/// atomically.
pub async fn extract_to_dir(
    input_dir: impl AsRef<Path>,
    output_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<(BatchOutput, ExportSummary), InvoiceError> {
    let output = extract_directory(input_dir, config).await?;
    let summary = export::write_batch(&output, output_dir.as_ref(), chrono::Local::now())?;
    Ok((output, summary))
}

/// Run the pure part of the pipeline on one raw model response.
///
/// Parse → normalize → validate → markup, plus the totals consistency check.
/// Needs no model, no files and no runtime, so captured responses can be
/// replayed through it.
///
/// # Errors
/// * [`DocumentError::Response`] — no usable JSON in `raw_text`.
/// * [`DocumentError::NoRows`] — every row was dropped, or there were none.
pub fn extract_response(
    raw_text: &str,
    source_document: &str,
    config: &ExtractionConfig,
) -> Result<Extraction, DocumentError> {
    let record = parse::parse(raw_text).map_err(|source| DocumentError::Response {
        document: source_document.to_string(),
        source,
    })?;
    let raw_rows = normalize::normalize(&record, config.max_rows);
    let validated = validate::validate(&raw_rows, &config.rules, source_document);
    if validated.rows.is_empty() {
        return Err(DocumentError::NoRows {
            document: source_document.to_string(),
            dropped: validated.dropped,
        });
    }
    let rows = pricing::apply_markup(validated.rows, config.rules.markup_rate);
    let total_mismatches = pricing::check_totals(&rows);

    debug!(
        "{}: {} rows kept, {} dropped",
        source_document,
        rows.len(),
        validated.dropped
    );
    Ok(Extraction {
        table: InvoiceTable::new(source_document, rows),
        rows_dropped: validated.dropped,
        total_mismatches,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// A document to process; `bytes` is set when it is already in memory.
pub(crate) struct Job {
    pub(crate) source: SourceDocument,
    pub(crate) bytes: Option<Vec<u8>>,
}

/// The finished work for one document.
pub(crate) struct Processed {
    pub(crate) result: DocumentResult,
    pub(crate) table: Option<InvoiceTable>,
}

async fn run_batch(
    jobs: Vec<Job>,
    skipped_files: usize,
    config: &ExtractionConfig,
) -> Result<BatchOutput, InvoiceError> {
    let total_start = Instant::now();
    let total = jobs.len();
    let model = llm::resolve_model(config)?;
    let config = Arc::new(config.clone());

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    let mut processed: Vec<Processed> = stream::iter(jobs.into_iter().map(|job| {
        let model = Arc::clone(&model);
        let config = Arc::clone(&config);
        async move { process_document(model, job, total, &config).await }
    }))
    .buffer_unordered(config.concurrency)
    .collect()
    .await;

    // Completion order is arbitrary; provenance order is discovery order.
    processed.sort_by_key(|p| p.result.index);

    let (results, tables): (Vec<DocumentResult>, Vec<Option<InvoiceTable>>) =
        processed.into_iter().map(|p| (p.result, p.table)).unzip();
    let tables: Vec<InvoiceTable> = tables.into_iter().flatten().collect();

    let mut stats = BatchStats::from_results(&results, skipped_files);
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(total, stats.succeeded);
    }

    if tables.is_empty() {
        let first_error = results
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(InvoiceError::AllDocumentsFailed { total, first_error });
    }

    let (tables, combined) = assemble::assemble(tables);

    info!(
        "Extraction complete: {}/{} documents, {} rows ({} dropped), {}ms",
        stats.succeeded, stats.total_documents, stats.rows_extracted, stats.rows_dropped,
        stats.total_duration_ms
    );

    Ok(BatchOutput {
        tables,
        combined,
        documents: results,
        stats,
    })
}

/// Load, call the model, and run the pure pipeline for one document.
///
/// Never fails: a document-level error is recorded in the result.
pub(crate) async fn process_document(
    model: Arc<dyn VisionModel>,
    job: Job,
    total: usize,
    config: &ExtractionConfig,
) -> Processed {
    let start = Instant::now();
    let source = job.source;
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(source.index, total, &source.name);
    }

    let mut result = DocumentResult {
        index: source.index,
        source_document: source.name.clone(),
        path: source.path.clone(),
        rows_extracted: 0,
        rows_dropped: 0,
        retries: 0,
        total_mismatches: 0,
        duration_ms: 0,
        error: None,
    };

    let outcome = run_document(model.as_ref(), &source, job.bytes, config, &mut result).await;
    result.duration_ms = start.elapsed().as_millis() as u64;

    let table = match outcome {
        Ok(extraction) => {
            result.rows_extracted = extraction.table.len();
            result.rows_dropped = extraction.rows_dropped;
            result.total_mismatches = extraction.total_mismatches;
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_complete(source.index, total, &source.name, result.rows_extracted);
            }
            Some(extraction.table)
        }
        Err(e) => {
            warn!("{}", e);
            if let DocumentError::NoRows { dropped, .. } = &e {
                result.rows_dropped = *dropped;
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_error(source.index, total, &source.name, &e.to_string());
            }
            result.error = Some(e);
            None
        }
    };

    Processed { result, table }
}

async fn run_document(
    model: &dyn VisionModel,
    source: &SourceDocument,
    bytes: Option<Vec<u8>>,
    config: &ExtractionConfig,
    result: &mut DocumentResult,
) -> Result<Extraction, DocumentError> {
    let payload = match bytes {
        Some(bytes) => input::payload_from_bytes(source, bytes).await?,
        None => input::load_document(source).await?,
    };

    let prompt = config.prompt.as_deref().unwrap_or(DEFAULT_EXTRACTION_PROMPT);
    let reply =
        llm::invoke_with_retry(model, &payload, prompt, &config.retry, config.api_timeout()).await?;
    result.retries = reply.retries;

    extract_response(&reply.text, &source.name, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn scenario_keeps_only_the_priced_row() {
        let raw = "Here is the data:\n```json\n{\"product\":[\"A\",\"B\"],\"unit_price\":[10]}\n```";
        let out = extract_response(raw, "inv.pdf", &ExtractionConfig::default()).unwrap();
        assert_eq!(out.rows_dropped, 1);
        assert_eq!(out.table.len(), 1);
        let row = &out.table.rows[0];
        assert_eq!(row.product, "A");
        assert_eq!(row.unit_price, Some(dec!(10)));
        assert_eq!(row.marked_up_price, Some(dec!(12.5)));
        assert_eq!(row.source_document, "inv.pdf");
    }

    #[test]
    fn all_rows_dropped_is_no_rows() {
        let raw = r#"{"product": ["N/A", ""], "unit_price": [1, 2]}"#;
        let err = extract_response(raw, "inv.pdf", &ExtractionConfig::default()).unwrap_err();
        assert_eq!(
            err,
            DocumentError::NoRows {
                document: "inv.pdf".into(),
                dropped: 2
            }
        );
    }

    #[test]
    fn unparseable_response_names_the_document() {
        let err = extract_response("no data", "scan.png", &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, DocumentError::Response { .. }));
        assert_eq!(err.document(), "scan.png");
    }

    #[test]
    fn legacy_keys_and_custom_markup() {
        let raw = r#"{"Date": ["24/06/2023"], "Product": ["BD2 Coriander Eng"],
                      "Qty": [50], "U.Price": [7.5], "Total": [375]}"#;
        let config = ExtractionConfig::builder()
            .markup_rate(dec!(0.10))
            .build()
            .unwrap();
        let out = extract_response(raw, "inv.pdf", &config).unwrap();
        let row = &out.table.rows[0];
        assert_eq!(row.date, chrono::NaiveDate::from_ymd_opt(2023, 6, 24));
        assert_eq!(row.quantity, Some(dec!(50)));
        assert_eq!(row.marked_up_price, Some(dec!(8.25)));
        assert_eq!(out.total_mismatches, 0);
    }

    #[test]
    fn pipeline_is_idempotent() {
        let raw = r#"{"product": ["Bolt", "Nut"], "quantity": [4], "total_price": [20.0, 3]}"#;
        let config = ExtractionConfig::default();
        let a = extract_response(raw, "x.pdf", &config).unwrap();
        let b = extract_response(raw, "x.pdf", &config).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.table.rows[0].unit_price, Some(dec!(5.0)));
        assert_eq!(a.table.rows[1].unit_price, None);
    }

    #[test]
    fn oversized_unit_price_keeps_the_row_without_markup() {
        for raw in [
            r#"{"product": ["A"], "unit_price": [7e28]}"#,
            r#"{"product": ["A"], "unit_price": ["70000000000000000000000000000"]}"#,
        ] {
            let out = extract_response(raw, "inv.pdf", &ExtractionConfig::default()).unwrap();
            assert_eq!(out.table.len(), 1);
            assert!(out.table.rows[0].unit_price.is_some());
            assert_eq!(out.table.rows[0].marked_up_price, None);
        }
    }
}
