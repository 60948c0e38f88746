//! Page span derivation over marked text.
//!
//! Locates each marker's offset and turns the marker sequence into ordered,
//! contiguous [`PageSpan`]s whose union covers the entire text. Runs only on
//! text the marker codec has already validated; a mismatch between markers
//! and pages here is a programming error, not user input.

use crate::errors::{Error, Result};
use crate::hashing::hash_page;
use crate::marker::marker_positions;
use crate::models::{PageSpan, RawPage};

/// Compute the ordered page spans for `text`.
///
/// `start` is each page's marker offset; `end` is the next marker's offset
/// or the end of text. `char_len` counts the page body only (marker line and
/// its trailing newline excluded). Returns [`Error::Internal`] if the number
/// of markers found does not match `pages.len()`; that is unreachable after
/// a successful decode.
pub fn build_page_spans(text: &str, pages: &[RawPage], doc_id: &str) -> Result<Vec<PageSpan>> {
    if pages.is_empty() {
        return Ok(Vec::new());
    }

    let markers = marker_positions(text)?;
    if markers.len() != pages.len() {
        return Err(Error::Internal(format!(
            "marker count ({}) does not match page count ({})",
            markers.len(),
            pages.len()
        )));
    }

    let mut spans = Vec::with_capacity(markers.len());
    for (i, marker) in markers.iter().enumerate() {
        let page = pages.iter().find(|p| p.page_no == marker.page_no).ok_or_else(|| {
            Error::Internal(format!("no page for marker {}", marker.page_no))
        })?;

        let end = match markers.get(i + 1) {
            Some(next) => next.start,
            None => text.len(),
        };

        let mut content_start = marker.end;
        if text[content_start..].starts_with('\n') {
            content_start += 1;
        }

        spans.push(PageSpan {
            page_no: marker.page_no,
            start: marker.start,
            end,
            char_len: end.saturating_sub(content_start),
            hash: hash_page(doc_id, marker.page_no, &page.text),
        });
    }

    Ok(spans)
}

/// Offset where a page span's body begins (just past the marker line).
pub fn body_start(text: &str, span: &PageSpan) -> usize {
    let markers = marker_positions(&text[span.start..span.end]).unwrap_or_default();
    let mut content_start = match markers.first() {
        Some(m) => span.start + m.end,
        None => span.start,
    };
    if text[content_start..].starts_with('\n') {
        content_start += 1;
    }
    content_start
}
