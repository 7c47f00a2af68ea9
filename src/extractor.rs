//! Text Extractor (C3): turns a file on disk into plain text
//!
//! Grounded on the teacher's `knowledge::fetcher::WebFetcher` (config struct
//! + typed result + "try each strategy, fall through" shape), retargeted
//! from web fetching to local file extraction. PDF/DOCX parsing are pulled
//! in from the wider example pack since the teacher has no local-document
//! precedent: `pdf-extract` appears directly in the teacher's own
//! `examples/pdf_rag_with_tables.rs`, `docx-rs` is an ecosystem addition.

use crate::config::IngestionConfig;
use crate::error::{ExtractionError, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Minimum number of characters a document must yield to be considered
/// useful; shorter extractions are treated as empty (§4.3 edge case)
const MIN_USEFUL_CONTENT_LEN: usize = 50;

/// Extracted plain text plus the bits of file metadata the rest of the
/// pipeline needs without re-stat'ing the file
#[derive(Debug, Clone)]
pub struct ExtractedDocument {
    pub text: String,
    pub file_type: String,
}

/// Converts files into plain text for chunking. Stateless beyond the
/// configured size cap; safe to share across extraction workers.
#[derive(Clone)]
pub struct Extractor {
    max_document_size_bytes: u64,
}

impl Extractor {
    pub fn new(config: &IngestionConfig) -> Self {
        Self {
            max_document_size_bytes: config.max_document_size_bytes,
        }
    }

    /// Extract text from `path`, dispatching on its extension
    ///
    /// Returns `Ok(None)` for files whose extension isn't in the supported
    /// set (§4.3: unknown extensions are skipped, not force-fed through the
    /// plain-text path) or that parse cleanly but yield no useful content
    /// (empty PDF, near-empty text file) rather than an error, so callers
    /// can skip them without treating it as an ingestion failure.
    pub fn extract(&self, path: &Path) -> Result<Option<ExtractedDocument>> {
        if !is_supported_extension(path) {
            debug!(path = %path.display(), "unsupported extension, skipping");
            return Ok(None);
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.max_document_size_bytes {
            return Err(ExtractionError::TooLarge(metadata.len()).into());
        }

        let file_type = file_type_of(path);
        let raw = match file_type.as_str() {
            "pdf" => self.extract_pdf(path)?,
            "docx" => self.extract_docx(path)?,
            _ => self.extract_plain(path)?,
        };

        let trimmed = raw.trim();
        if trimmed.chars().count() < MIN_USEFUL_CONTENT_LEN {
            debug!(path = %path.display(), len = trimmed.len(), "extraction yielded too little content, skipping");
            return Ok(None);
        }

        Ok(Some(ExtractedDocument {
            text: normalize_whitespace(trimmed),
            file_type,
        }))
    }

    fn extract_pdf(&self, path: &Path) -> Result<String> {
        pdf_extract::extract_text(path).map_err(|e| {
            ExtractionError::ParserFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn extract_docx(&self, path: &Path) -> Result<String> {
        let bytes = std::fs::read(path)?;
        let docx = docx_rs::read_docx(&bytes).map_err(|e| ExtractionError::ParserFailed {
            path: path.display().to_string(),
            reason: format!("{:?}", e),
        })?;
        Ok(docx_paragraph_text(&docx))
    }

    fn extract_plain(&self, path: &Path) -> Result<String> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Permissive fallback for files that are mostly-UTF8 but
                // contain a handful of invalid byte sequences.
                let bytes = std::fs::read(path)?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Walk a parsed docx document's body, concatenating run text with a
/// newline between paragraphs
fn docx_paragraph_text(docx: &docx_rs::Docx) -> String {
    let mut out = String::new();
    for child in &docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(paragraph) = child {
            for run_child in &paragraph.children {
                if let docx_rs::ParagraphChild::Run(run) = run_child {
                    for run_part in &run.children {
                        if let docx_rs::RunChild::Text(text) = run_part {
                            out.push_str(&text.text);
                        }
                    }
                }
            }
            out.push('\n');
        }
    }
    out
}

/// File extension, lower-cased, defaulting to "txt" for extension-less
/// files (§4.3: unknown types fall through to the plain-text path)
fn file_type_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_else(|| "txt".to_string())
}

/// Collapse runs of whitespace produced by table/column extraction into
/// single spaces within a line, while preserving paragraph breaks
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether `path`'s extension is one the extractor has dedicated support
/// for, used by the directory scanner to decide what counts as ingestible
pub fn is_supported_extension(path: &Path) -> bool {
    const SUPPORTED: &[&str] = &[
        "pdf", "docx", "txt", "md", "markdown", "rst", "csv", "json", "yaml", "yml", "html",
        "htm", "xml", "log",
    ];
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => SUPPORTED.contains(&ext.to_lowercase().as_str()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn extractor() -> Extractor {
        Extractor::new(&IngestionConfig {
            max_document_size_bytes: 1024 * 1024,
            ..IngestionConfig::default()
        })
    }

    #[test]
    fn test_extract_plain_text() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "{}", "a".repeat(200)).unwrap();
        let doc = extractor().extract(file.path()).unwrap().unwrap();
        assert_eq!(doc.file_type, "txt");
        assert!(doc.text.len() >= 200);
    }

    #[test]
    fn test_too_short_content_skipped() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "hi").unwrap();
        let result = extractor().extract(file.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_oversized_file_rejected() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "{}", "a".repeat(200)).unwrap();
        let small_extractor = Extractor::new(&IngestionConfig {
            max_document_size_bytes: 10,
            ..IngestionConfig::default()
        });
        let err = small_extractor.extract(file.path()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::WhereSpaceError::Extraction(ExtractionError::TooLarge(_))
        ));
    }

    #[test]
    fn test_unsupported_extension_is_skipped() {
        let mut file = NamedTempFile::with_suffix(".xyz").unwrap();
        writeln!(file, "{}", "some body text here ".repeat(10)).unwrap();
        let result = extractor().extract(file.path()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_is_supported_extension() {
        assert!(is_supported_extension(Path::new("a.pdf")));
        assert!(is_supported_extension(Path::new("a.MD")));
        assert!(!is_supported_extension(Path::new("a.exe")));
        assert!(!is_supported_extension(Path::new("a")));
    }
}
