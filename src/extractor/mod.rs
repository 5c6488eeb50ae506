// Text extraction
// Turns corpus documents into flat text ready for chunking


use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::{QaError, Result};

/// Kind of source document, decided by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    PlainText,
}

impl DocumentKind {
    #[inline]
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => Ok(Self::Pdf),
            Some("txt" | "md" | "text") => Ok(Self::PlainText),
            _ => Err(QaError::Extraction(format!(
                "Unsupported document type: {}",
                path.display()
            ))),
        }
    }
}

/// Extract the normalized text of one document
#[inline]
pub fn extract_text(path: &Path) -> Result<String> {
    let kind = DocumentKind::from_path(path)?;
    debug!("Extracting {:?} document {}", kind, path.display());

    let text = match kind {
        DocumentKind::Pdf => {
            let bytes = read_document(path)?;
            let raw = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| {
                QaError::Extraction(format!("Failed to parse PDF {}: {}", path.display(), e))
            })?;
            flatten_lines(&raw)
        }
        DocumentKind::PlainText => {
            let bytes = read_document(path)?;
            let raw = String::from_utf8(bytes).map_err(|e| {
                QaError::Extraction(format!(
                    "Document {} is not valid UTF-8: {}",
                    path.display(),
                    e
                ))
            })?;
            normalize_line_endings(&raw)
        }
    };

    info!(
        "Extracted {} characters from {}",
        text.chars().count(),
        path.display()
    );
    Ok(text)
}

fn read_document(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        QaError::Extraction(format!("Failed to read document {}: {}", path.display(), e))
    })
}

/// PDF text arrives with layout line breaks and page feeds; collapse them
/// into spaces so passages follow the prose rather than the page layout.
#[inline]
pub fn flatten_lines(text: &str) -> String {
    text.chars()
        .map(|c| if matches!(c, '\n' | '\r' | '\x0c') { ' ' } else { c })
        .collect()
}

/// Normalize Windows and old Mac line endings to `\n`
#[inline]
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
