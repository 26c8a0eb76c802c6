//! # invoice-extract
//!
//! Extract invoice line items (date, product, quantity, unit price, total)
//! from PDFs and images using Vision Language Models (VLMs), and turn the
//! model's loosely structured JSON into clean, validated tables.
//!
//! ## Why this crate?
//!
//! A vision model reads invoices well, but what it writes back is not a
//! table: JSON wrapped in prose or markdown fences, parallel arrays of
//! different lengths, `"N/A"` products, prices with currency symbols, dates
//! in whatever format the invoice used. This crate owns everything after the
//! model call and guarantees that whatever comes back is either normalised
//! into a well-formed table or rejected with a clear per-document error.
//!
//! ## Pipeline Overview
//!
//! ```text
//! directory of PDFs / images
//!  │
//!  ├─ 1. Input      discover + check each document
//!  ├─ 2. VLM        concurrent model calls with retry/backoff
//!  ├─ 3. Parse      first complete JSON value in the reply → FieldRecord
//!  ├─ 4. Normalize  pad ragged fields to the longest → rows
//!  ├─ 5. Validate   type values; drop rows without product or price
//!  ├─ 6. Pricing    derive missing unit price; markup = unit × (1 + rate)
//!  └─ 7. Assemble   per-document tables + combined table sorted by date, product
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_extract::{extract_directory, ExtractionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = ExtractionConfig::default();
//!     let output = extract_directory("invoices/", &config).await?;
//!     for row in &output.combined.rows {
//!         println!("{:?} {} {:?}", row.date, row.product, row.marked_up_price);
//!     }
//!     eprintln!("{} rows, {} dropped", output.stats.rows_extracted, output.stats.rows_dropped);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `cli`     | on      | Enables the `invoice-extract` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! //!
//! Disable `cli` when using only the library:
//! ```toml
//! invoice-extract = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod export;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod record;
pub mod stream;
pub mod table;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractionConfig, ExtractionConfigBuilder, RetryPolicy, RowRules};
pub use error::{DocumentError, InvoiceError, ModelError, ResponseError};
pub use export::ExportSummary;
pub use extract::{
    extract_bytes, extract_directory, extract_document, extract_response, extract_sync,
    extract_to_dir, Extraction,
};
pub use output::{BatchOutput, BatchStats, DocumentResult};
pub use pipeline::input::{ContentKind, DocumentPayload, SourceDocument};
pub use pipeline::llm::{LlmVisionModel, VisionModel};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use record::{Field, FieldRecord, RawRow, RawValue};
pub use stream::{extract_stream, InvoiceStream};
pub use table::{CombinedTable, InvoiceRow, InvoiceTable};
