//! Error types for the invoice-extract library.
//!
//! Four error types reflect four distinct failure scopes:
//!
//! * [`InvoiceError`] — **Fatal**: the batch cannot proceed at all (input
//!   directory missing, provider not configured, output not writable).
//!   Returned as `Err(InvoiceError)` from the top-level `extract*` functions.
//!
//! * [`DocumentError`] — **Non-fatal**: a single document failed (model
//!   retries exhausted, unparseable response) but every other document in the
//!   batch is unaffected. Stored inside [`crate::output::DocumentResult`].
//!
//! * [`ModelError`] — what the vision-model collaborator reports for one call.
//!   Only [`ModelError::Transient`] is retried.
//!
//! * [`ResponseError`] — the model answered, but the text holds no usable
//!   JSON or the JSON has the wrong shape.
//!
//! Dropping a row during validation is not an error at all; it is counted in
//! [`crate::output::DocumentResult::rows_dropped`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the invoice-extract library.
#[derive(Debug, Error)]
pub enum InvoiceError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input directory does not exist.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is a directory.")]
    InputNotFound { path: PathBuf },

    /// The input directory exists but could not be listed.
    #[error("Failed to read input directory '{path}': {source}")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The input directory holds no PDF or image files.
    #[error("No supported documents (pdf, jpg, jpeg, png, webp, gif) found in '{path}'")]
    NoDocuments { path: PathBuf },

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Vision provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Every document failed; nothing can be exported.
    #[error("All {total} documents failed.\nFirst error: {first_error}")]
    AllDocumentsFailed { total: usize, first_error: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output table.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// CSV serialisation failed while writing an output table.
    #[error("Failed to encode CSV for '{path}': {source}")]
    CsvEncodeFailed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
///
/// The batch continues; the document simply contributes no rows.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The file could not be read or is not what its extension claims.
    #[error("{document}: invalid document: {detail}")]
    InvalidDocument { document: String, detail: String },

    /// Transient model failures persisted through every retry.
    #[error("{document}: model call failed after {retries} retries: {detail}")]
    ModelFailed {
        document: String,
        retries: u32,
        detail: String,
    },

    /// The model rejected the request outright (auth failure, bad input).
    #[error("{document}: model rejected the request: {detail}")]
    ModelRejected { document: String, detail: String },

    /// The model answered but the answer could not be turned into fields.
    #[error("{document}: {source}")]
    Response {
        document: String,
        #[source]
        source: ResponseError,
    },

    /// Every extracted row was dropped by validation.
    #[error("{document}: no valid line items ({dropped} rows dropped)")]
    NoRows { document: String, dropped: usize },
}

impl DocumentError {
    /// Name of the document this error belongs to.
    pub fn document(&self) -> &str {
        match self {
            DocumentError::InvalidDocument { document, .. }
            | DocumentError::ModelFailed { document, .. }
            | DocumentError::ModelRejected { document, .. }
            | DocumentError::Response { document, .. }
            | DocumentError::NoRows { document, .. } => document,
        }
    }
}

/// Failure of a single vision-model call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Timeouts, rate limits, 5xx responses, dropped connections.
    #[error("transient model error: {0}")]
    Transient(String),

    /// Invalid file, authentication failure, malformed request.
    #[error("permanent model error: {0}")]
    Permanent(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Transient(_))
    }
}

/// The model's text could not be turned into a field record.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ResponseError {
    /// No complete JSON object or array anywhere in the response.
    #[error("malformed response: no JSON object or array found ({excerpt:?})")]
    MalformedResponse { excerpt: String },

    /// JSON was found but is neither a field→array mapping nor an array of row
    /// objects, or carries none of the recognised field names.
    #[error("unexpected schema: {detail}")]
    UnexpectedSchema { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_documents_failed_display() {
        let e = InvoiceError::AllDocumentsFailed {
            total: 3,
            first_error: "boom".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("All 3 documents"), "got: {msg}");
        assert!(msg.contains("boom"));
    }

    #[test]
    fn model_failed_display_names_document() {
        let e = DocumentError::ModelFailed {
            document: "inv-001.pdf".into(),
            retries: 2,
            detail: "HTTP 503".into(),
        };
        assert!(e.to_string().contains("inv-001.pdf"));
        assert!(e.to_string().contains("2 retries"));
        assert_eq!(e.document(), "inv-001.pdf");
    }

    #[test]
    fn response_error_is_wrapped() {
        let e = DocumentError::Response {
            document: "scan.png".into(),
            source: ResponseError::UnexpectedSchema {
                detail: "top-level value is a number".into(),
            },
        };
        assert!(e.to_string().contains("unexpected schema"));
    }

    #[test]
    fn only_transient_is_retryable() {
        assert!(ModelError::Transient("429".into()).is_retryable());
        assert!(!ModelError::Permanent("401".into()).is_retryable());
    }
}
