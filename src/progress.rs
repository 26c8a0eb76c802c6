//! Progress-callback trait for per-document extraction events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the batch driver works through a directory.
//!
//! # Example
//!
//! ```rust
//! use invoice_extract::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct RowCounter {
//!     rows: AtomicUsize,
//! }
//!
//! impl ExtractionProgressCallback for RowCounter {
//!     fn on_document_complete(&self, _index: usize, _total: usize, name: &str, rows: usize) {
//!         self.rows.fetch_add(rows, Ordering::SeqCst);
//!         eprintln!("{name}: {rows} rows");
//!     }
//! }
//!
//! let counter = Arc::new(RowCounter { rows: AtomicUsize::new(0) });
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the batch driver as it processes each document.
///
/// Documents run concurrently, so `on_document_*` may be called from several
/// tasks at once; implementations must synchronise their own state. Every
/// method defaults to a no-op.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once after discovery, before any model call.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called just before a document is loaded and sent to the model.
    ///
    /// `index` is 1-based in discovery order.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document produced a table with `rows` rows.
    fn on_document_complete(&self, index: usize, total: usize, name: &str, rows: usize) {
        let _ = (index, total, name, rows);
    }

    /// Called when a document failed; the batch continues.
    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every document has been attempted.
    fn on_batch_complete(&self, total_documents: usize, succeeded: usize) {
        let _ = (total_documents, succeeded);
    }
}

/// Used when no callback is configured.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
