//! Streaming extraction API: emit each document's table as it completes.
//!
//! Unlike the eager [`crate::extract::extract_directory`], which returns only
//! after every document finishes and then merges them, [`extract_stream`]
//! yields one item per document as soon as that document is done. Items
//! arrive in completion order; sort by `source_document` if order matters.
//! No combined table is built; collect the tables and call
//! [`crate::pipeline::assemble::assemble`] for that.

use crate::config::ExtractionConfig;
use crate::error::{DocumentError, InvoiceError};
use crate::extract::{process_document, Job};
use crate::pipeline::{input, llm};
use crate::table::InvoiceTable;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of per-document results.
pub type InvoiceStream = Pin<Box<dyn Stream<Item = Result<InvoiceTable, DocumentError>> + Send>>;

/// Extract a directory, streaming one table per document.
///
/// # Returns
/// - `Ok(InvoiceStream)` — a stream of `Result<InvoiceTable, DocumentError>`
/// - `Err(InvoiceError)` — fatal error (directory missing, no documents,
///   no provider)
///
/// # Example
/// ```rust,no_run
/// use invoice_extract::{extract_stream, ExtractionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut tables = extract_stream("invoices/", &ExtractionConfig::default()).await?;
/// while let Some(item) = tables.next().await {
///     match item {
///         Ok(t) => println!("{}: {} rows", t.source_document, t.len()),
///         Err(e) => eprintln!("Error: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn extract_stream(
    input_dir: impl AsRef<Path>,
    config: &ExtractionConfig,
) -> Result<InvoiceStream, InvoiceError> {
    let input_dir = input_dir.as_ref();
    info!("Starting streaming extraction: {}", input_dir.display());

    let found = input::discover_documents(input_dir)?;
    if found.documents.is_empty() {
        return Err(InvoiceError::NoDocuments {
            path: input_dir.to_path_buf(),
        });
    }

    let model = llm::resolve_model(config)?;
    let total = found.documents.len();
    let concurrency = config.concurrency;
    let config = Arc::new(config.clone());

    let s = stream::iter(found.documents.into_iter().map(move |source| {
        let model = Arc::clone(&model);
        let config = Arc::clone(&config);
        async move {
            let processed = process_document(model, Job { source, bytes: None }, total, &config).await;
            match (processed.table, processed.result.error) {
                (Some(table), _) => Ok(table),
                (None, Some(err)) => Err(err),
                (None, None) => Err(DocumentError::NoRows {
                    document: processed.result.source_document,
                    dropped: processed.result.rows_dropped,
                }),
            }
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
