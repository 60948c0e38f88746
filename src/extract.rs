//! Document extraction at the collaborator boundary.
//!
//! Turns source bytes into per-page text plus extraction metadata. PDF pages
//! come from `pdf-extract` (pages separated by form feeds in its plain-text
//! output); plain text is treated as one page, or several when it contains
//! form feeds. Failures surface as [`Error::ExtractionFailed`] and are never
//! retried here.

use chrono::Utc;

use crate::errors::{Error, Result};
use crate::models::{ExtractMeta, RawPage};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// Extract pages from source bytes.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<(Vec<RawPage>, ExtractMeta)> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT => extract_plain(bytes),
        other => Err(Error::ExtractionFailed(format!(
            "unsupported content type: {}",
            other
        ))),
    }
}

/// Guess the content type from a file extension, defaulting to plain text.
pub fn content_type_for_path(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => MIME_PDF,
        _ => MIME_TEXT,
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<(Vec<RawPage>, ExtractMeta)> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| Error::ExtractionFailed(e.to_string()))?;
    paginate(&text, "pdf-extract")
}

fn extract_plain(bytes: &[u8]) -> Result<(Vec<RawPage>, ExtractMeta)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::ExtractionFailed(format!("invalid UTF-8: {}", e)))?;
    paginate(text, "plain")
}

/// Split extracted text on form feeds into 1-indexed pages.
fn paginate(text: &str, extractor_name: &str) -> Result<(Vec<RawPage>, ExtractMeta)> {
    let mut warnings = Vec::new();

    let pages: Vec<RawPage> = text
        .split('\u{0c}')
        .enumerate()
        .map(|(i, page_text)| RawPage {
            page_no: i as u32 + 1,
            text: page_text.trim_end_matches('\n').to_string(),
        })
        .collect();

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        warnings.push("document contains no extractable text".to_string());
    }

    let meta = ExtractMeta {
        extractor_name: extractor_name.to_string(),
        extractor_version: env!("CARGO_PKG_VERSION").to_string(),
        page_count: pages.len() as u32,
        warnings,
        created_at: Utc::now(),
    };

    Ok((pages, meta))
}
