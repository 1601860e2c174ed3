//! Document Loading
//!
//! Reads documents from filesystem paths or uploaded byte buffers in the
//! supported formats (plain text, Markdown, PDF) and decodes them to text.
//! Failures are per-item: one unreadable file never aborts the batch.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};
use ulid::Ulid;

/// Maximum file size (50 MB) allowed for loading.
const MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("file too large: {0} bytes (max {1} bytes)")]
    TooLarge(u64, u64),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("PDF extraction failed: {0}")]
    PdfExtract(String),
}

impl Serialize for LoadError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Where a document comes from: a path on disk or an uploaded buffer.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl DocumentSource {
    /// Display name used in reports and chunk metadata.
    pub fn display_name(&self) -> String {
        match self {
            DocumentSource::Path(path) => path.display().to_string(),
            DocumentSource::Bytes { name, .. } => name.clone(),
        }
    }
}

/// Supported document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Text,
    Markdown,
    Pdf,
}

/// A loaded, decoded document. Discarded after chunking; the index never
/// retains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub source: String,
    pub format: DocumentFormat,
    pub content: String,
}

/// A per-item load failure, reported alongside the successes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadFailure {
    pub source: String,
    pub error: LoadError,
}

/// Result of loading a batch: successfully decoded documents plus the
/// failures that were skipped.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub failures: Vec<LoadFailure>,
}

/// Load a batch of sources. Never fails as a whole; check
/// `LoadOutcome::failures` for per-item errors.
pub fn load_documents(sources: &[DocumentSource]) -> LoadOutcome {
    let mut outcome = LoadOutcome::default();
    for source in sources {
        match load_one(source) {
            Ok(document) => {
                info!(
                    source = %document.source,
                    format = ?document.format,
                    bytes = document.content.len(),
                    "Loaded document"
                );
                outcome.documents.push(document);
            }
            Err(error) => {
                warn!(source = %source.display_name(), error = %error, "Skipping document");
                outcome.failures.push(LoadFailure {
                    source: source.display_name(),
                    error,
                });
            }
        }
    }
    outcome
}

fn load_one(source: &DocumentSource) -> Result<Document, LoadError> {
    let (name, format, data) = match source {
        DocumentSource::Path(path) => {
            let format = detect_path_format(path)?;
            let size = fs::metadata(path)?.len();
            if size > MAX_FILE_SIZE {
                return Err(LoadError::TooLarge(size, MAX_FILE_SIZE));
            }
            (path.display().to_string(), format, fs::read(path)?)
        }
        DocumentSource::Bytes { name, data } => {
            if data.len() as u64 > MAX_FILE_SIZE {
                return Err(LoadError::TooLarge(data.len() as u64, MAX_FILE_SIZE));
            }
            let format = detect_bytes_format(name, data)?;
            (name.clone(), format, data.clone())
        }
    };

    let content = match format {
        DocumentFormat::Pdf => extract_pdf_text(&data)?,
        // Markdown is read as plain text with markup retained
        DocumentFormat::Text | DocumentFormat::Markdown => {
            String::from_utf8(data).map_err(|e| LoadError::Decode(e.to_string()))?
        }
    };

    Ok(Document {
        id: Ulid::new().to_string(),
        source: name,
        format,
        content,
    })
}

fn extension_format(extension: &str) -> Option<DocumentFormat> {
    match extension {
        "txt" | "text" => Some(DocumentFormat::Text),
        "md" | "markdown" => Some(DocumentFormat::Markdown),
        "pdf" => Some(DocumentFormat::Pdf),
        _ => None,
    }
}

fn detect_path_format(path: &Path) -> Result<DocumentFormat, LoadError> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    extension_format(&extension)
        .ok_or_else(|| LoadError::UnsupportedFormat(path.display().to_string()))
}

/// Uploads are detected by extension first, then by content sniff for PDFs
/// uploaded without a useful name.
fn detect_bytes_format(name: &str, data: &[u8]) -> Result<DocumentFormat, LoadError> {
    let extension = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if let Some(format) = extension_format(&extension) {
        return Ok(format);
    }
    if data.starts_with(b"%PDF-") {
        return Ok(DocumentFormat::Pdf);
    }
    Err(LoadError::UnsupportedFormat(name.to_string()))
}

/// Extract text from a PDF using the system `pdftotext` binary via a
/// temporary file.
fn extract_pdf_text(data: &[u8]) -> Result<String, LoadError> {
    let temp_path = std::env::temp_dir().join(format!(
        "sourcebook_{}_{}.pdf",
        std::process::id(),
        Ulid::new()
    ));
    fs::write(&temp_path, data)?;

    let output = Command::new("pdftotext")
        .arg(&temp_path)
        .arg("-") // write extracted text to stdout
        .output();
    let _ = fs::remove_file(&temp_path);

    let output =
        output.map_err(|e| LoadError::PdfExtract(format!("failed to run pdftotext: {}", e)))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(LoadError::PdfExtract(stderr.trim().to_string()));
    }

    let text = String::from_utf8_lossy(&output.stdout).to_string();
    if text.trim().is_empty() {
        return Err(LoadError::PdfExtract("no text extracted".to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        // Leak the dir so the file outlives this helper
        std::mem::forget(dir);
        path
    }

    #[test]
    fn test_load_text_file() {
        let path = temp_file("notes.txt", "Plain text body.");
        let outcome = load_documents(&[DocumentSource::Path(path)]);
        assert_eq!(outcome.documents.len(), 1);
        assert!(outcome.failures.is_empty());
        let doc = &outcome.documents[0];
        assert_eq!(doc.format, DocumentFormat::Text);
        assert_eq!(doc.content, "Plain text body.");
    }

    #[test]
    fn test_markdown_keeps_markup() {
        let path = temp_file("readme.md", "# Title\n\nBody text.");
        let outcome = load_documents(&[DocumentSource::Path(path)]);
        assert_eq!(outcome.documents[0].format, DocumentFormat::Markdown);
        assert!(outcome.documents[0].content.starts_with("# Title"));
    }

    #[test]
    fn test_unsupported_extension_is_per_item_failure() {
        let good = temp_file("a.txt", "ok");
        let bad = temp_file("b.docx", "binary-ish");
        let outcome =
            load_documents(&[DocumentSource::Path(good), DocumentSource::Path(bad)]);
        assert_eq!(outcome.documents.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            LoadError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_missing_file_is_per_item_failure() {
        let outcome = load_documents(&[DocumentSource::Path(PathBuf::from(
            "/nonexistent/missing.txt",
        ))]);
        assert!(outcome.documents.is_empty());
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, LoadError::Io(_)));
    }

    #[test]
    fn test_bytes_source_by_name() {
        let outcome = load_documents(&[DocumentSource::Bytes {
            name: "upload.md".to_string(),
            data: b"## Uploaded".to_vec(),
        }]);
        assert_eq!(outcome.documents[0].format, DocumentFormat::Markdown);
        assert_eq!(outcome.documents[0].source, "upload.md");
    }

    #[test]
    fn test_bytes_pdf_magic_sniff() {
        // Not a decodable PDF, but the sniff must classify it as one
        let result = detect_bytes_format("upload", b"%PDF-1.7 garbage");
        assert_eq!(result.unwrap(), DocumentFormat::Pdf);
    }

    #[test]
    fn test_unnamed_bytes_without_magic_rejected() {
        let outcome = load_documents(&[DocumentSource::Bytes {
            name: "blob".to_string(),
            data: b"no format hints here".to_vec(),
        }]);
        assert!(outcome.documents.is_empty());
        assert!(matches!(
            outcome.failures[0].error,
            LoadError::UnsupportedFormat(_)
        ));
    }

    #[test]
    fn test_invalid_utf8_is_decode_failure() {
        let outcome = load_documents(&[DocumentSource::Bytes {
            name: "bad.txt".to_string(),
            data: vec![0xff, 0xfe, 0x00],
        }]);
        assert!(matches!(outcome.failures[0].error, LoadError::Decode(_)));
    }

    #[test]
    fn test_document_ids_are_unique() {
        let a = temp_file("a.txt", "same body");
        let b = temp_file("b.txt", "same body");
        let outcome = load_documents(&[DocumentSource::Path(a), DocumentSource::Path(b)]);
        assert_ne!(outcome.documents[0].id, outcome.documents[1].id);
    }
}
