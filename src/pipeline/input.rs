//! Document intake: list the input directory and load each file.
//!
//! Discovery is by extension only and never fails on a single odd file;
//! unknown extensions are skipped with an `info!` line. Loading is where a
//! file's content is checked: a PDF must start with `%PDF` and an image must
//! decode. Either failure is a per-document [`DocumentError::InvalidDocument`]
//! so one broken file never stops the batch.

use crate::error::{DocumentError, InvoiceError};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extensions treated as multi-page documents.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

/// Extensions treated as single images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];

/// How a document is handed to the vision model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// A PDF; may span several pages.
    Document,
    /// A single raster image.
    Image,
}

impl ContentKind {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Option<ContentKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if DOCUMENT_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentKind::Document)
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentKind::Image)
        } else {
            None
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Document => f.write_str("document"),
            ContentKind::Image => f.write_str("image"),
        }
    }
}

/// A file found in the input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// 1-based position in discovery order.
    pub index: usize,
    pub path: PathBuf,
    /// File name, used as the row provenance.
    pub name: String,
    pub kind: ContentKind,
}

impl SourceDocument {
    /// Build a source document for a single path, classifying it by extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<SourceDocument> {
        let path = path.into();
        let kind = ContentKind::from_path(&path)?;
        let name = path.file_name()?.to_string_lossy().into_owned();
        Some(SourceDocument {
            index: 1,
            path,
            name,
            kind,
        })
    }
}

/// A loaded document, ready for the model.
#[derive(Clone)]
pub struct DocumentPayload {
    pub source: SourceDocument,
    pub bytes: Vec<u8>,
    /// `application/pdf` for documents; the detected image type otherwise.
    pub mime_type: String,
}

impl DocumentPayload {
    /// Build a payload from bytes already in memory.
    pub fn new(source: SourceDocument, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            source,
            bytes,
            mime_type: mime_type.into(),
        }
    }

    pub fn kind(&self) -> ContentKind {
        self.source.kind
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }
}

impl fmt::Debug for DocumentPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentPayload")
            .field("source", &self.source)
            .field("bytes", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Result of listing an input directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    /// Supported files, sorted by name and numbered from 1.
    pub documents: Vec<SourceDocument>,
    /// Regular files with an unsupported extension.
    pub skipped: Vec<PathBuf>,
}

/// List supported documents in `dir` (non-recursive), sorted by file name.
///
/// # Errors
/// * [`InvoiceError::InputNotFound`] — `dir` is missing or not a directory.
/// * [`InvoiceError::InputUnreadable`] — `dir` could not be listed.
pub fn discover_documents(dir: &Path) -> Result<Discovery, InvoiceError> {
    if !dir.is_dir() {
        return Err(InvoiceError::InputNotFound {
            path: dir.to_path_buf(),
        });
    }

    let unreadable = |source| InvoiceError::InputUnreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut found = Discovery::default();
    for path in paths {
        match SourceDocument::from_path(&path) {
            Some(mut doc) => {
                doc.index = found.documents.len() + 1;
                debug!("Found {} '{}'", doc.kind, doc.name);
                found.documents.push(doc);
            }
            None => {
                info!("Skipping unsupported file: {}", path.display());
                found.skipped.push(path);
            }
        }
    }
    Ok(found)
}

/// Read a document and check its content matches its kind.
pub async fn load_document(source: &SourceDocument) -> Result<DocumentPayload, DocumentError> {
    let bytes = tokio::fs::read(&source.path)
        .await
        .map_err(|e| DocumentError::InvalidDocument {
            document: source.name.clone(),
            detail: format!("cannot read file: {e}"),
        })?;
    payload_from_bytes(source, bytes).await
}

/// Check in-memory bytes against the document's kind and wrap them.
pub async fn payload_from_bytes(
    source: &SourceDocument,
    bytes: Vec<u8>,
) -> Result<DocumentPayload, DocumentError> {
    let invalid = |detail: String| DocumentError::InvalidDocument {
        document: source.name.clone(),
        detail,
    };

    let mime_type = match source.kind {
        ContentKind::Document => {
            check_pdf_magic(&bytes).map_err(invalid)?;
            "application/pdf".to_string()
        }
        ContentKind::Image => {
            let to_check = bytes.clone();
            tokio::task::spawn_blocking(move || check_image(&to_check))
                .await
                .map_err(|e| invalid(format!("image check panicked: {e}")))?
                .map_err(invalid)?
        }
    };

    debug!("Loaded '{}' ({} bytes, {})", source.name, bytes.len(), mime_type);
    Ok(DocumentPayload::new(source.clone(), bytes, mime_type))
}

/// A PDF must begin with the `%PDF` magic bytes.
pub fn check_pdf_magic(bytes: &[u8]) -> Result<(), String> {
    match bytes.get(..4) {
        Some(b"%PDF") => Ok(()),
        Some(magic) => Err(format!("not a PDF (starts with {magic:02x?})")),
        None => Err("file is too short to be a PDF".into()),
    }
}

/// Decode an image fully and return its MIME type.
pub fn check_image(bytes: &[u8]) -> Result<String, String> {
    let format = image::guess_format(bytes).map_err(|e| format!("unrecognised image: {e}"))?;
    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| format!("image does not decode: {e}"))?;
    Ok(format.to_mime_type().to_string())
}
