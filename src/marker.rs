//! Page-marker codec: the single source of truth for the text/page mapping.
//!
//! Pages and the editable full text are interconvertible through literal
//! `<<<PAGE:n>>>` marker lines. [`build_text`] is total and pure; decoding
//! with [`parse_text`] is deliberately strict, because that is the boundary
//! where untrusted edited text re-enters the system. Round-trip law: for any
//! contiguous 1..N page set, `parse_text(build_text(pages), N) == pages`.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Error, Result};
use crate::models::RawPage;

/// Marker line format: `<<<PAGE:N>>>`.
pub fn marker_for(page_no: u32) -> String {
    format!("<<<PAGE:{}>>>", page_no)
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<<<PAGE:(\d+)>>>").expect("valid regex"))
}

/// A marker occurrence inside a marked text stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerPos {
    pub page_no: u32,
    /// Offset of the `<` that opens the marker.
    pub start: usize,
    /// Offset just past the closing `>`.
    pub end: usize,
}

/// Scan `text` for all marker occurrences in document order.
///
/// Markers whose page number does not fit in a `u32` are reported as
/// invalid rather than skipped: a number that large is tampering, not a
/// page.
pub fn marker_positions(text: &str) -> Result<Vec<MarkerPos>> {
    let mut markers = Vec::new();
    for caps in marker_re().captures_iter(text) {
        let whole = caps.get(0).expect("match has group 0");
        let digits = &caps[1];
        let page_no: u32 = digits.parse().map_err(|_| {
            Error::marker_invalid(format!("page number out of range: {}", digits))
        })?;
        markers.push(MarkerPos {
            page_no,
            start: whole.start(),
            end: whole.end(),
        });
    }
    Ok(markers)
}

/// Build the full marked text from pages.
///
/// Emits, for each page in order, the marker line followed by a newline and
/// the page text; pages are joined by a newline. Total over any page
/// collection.
pub fn build_text(pages: &[RawPage]) -> String {
    if pages.is_empty() {
        return String::new();
    }

    let mut parts = Vec::with_capacity(pages.len() * 2);
    for page in pages {
        parts.push(marker_for(page.page_no));
        parts.push(page.text.clone());
    }
    parts.join("\n")
}

/// Parse marked text back into pages, validating marker structure.
///
/// Fails with [`Error::MarkerInvalid`] when markers are missing, duplicated,
/// out of order, not exactly `1..=expected_page_count`, or when
/// non-whitespace content appears before the first marker. Ordinary edits to
/// page bodies pass through untouched.
pub fn parse_text(text: &str, expected_page_count: u32) -> Result<Vec<RawPage>> {
    if expected_page_count == 0 {
        if !text.trim().is_empty() {
            return Err(Error::marker_invalid(format!(
                "expected 0 pages but text has {} characters",
                text.len()
            )));
        }
        return Ok(Vec::new());
    }

    let markers = marker_positions(text)?;
    if markers.is_empty() {
        return Err(Error::marker_invalid(format!(
            "no page markers found (expected {} pages)",
            expected_page_count
        )));
    }

    if !text[..markers[0].start].trim().is_empty() {
        return Err(Error::marker_invalid(
            "content before the first page marker",
        ));
    }

    validate_sequence(&markers, expected_page_count)?;

    let mut pages = Vec::with_capacity(markers.len());
    for (i, marker) in markers.iter().enumerate() {
        // Body starts after the marker line's newline.
        let mut content_start = marker.end;
        if text[content_start..].starts_with('\n') {
            content_start += 1;
        }

        // Body ends just before the newline that precedes the next marker.
        let content_end = match markers.get(i + 1) {
            Some(next) => {
                let mut end = next.start;
                if end > content_start && text[..end].ends_with('\n') {
                    end -= 1;
                }
                end
            }
            None => text.len(),
        };

        pages.push(RawPage {
            page_no: marker.page_no,
            text: text[content_start..content_end.max(content_start)].to_string(),
        });
    }

    Ok(pages)
}

fn validate_sequence(markers: &[MarkerPos], expected: u32) -> Result<()> {
    let found: Vec<u32> = markers.iter().map(|m| m.page_no).collect();

    let mut seen = vec![false; expected as usize + 1];
    let mut duplicates = Vec::new();
    let mut extra = Vec::new();
    for &n in &found {
        if n == 0 || n > expected {
            extra.push(n);
        } else if seen[n as usize] {
            duplicates.push(n);
        } else {
            seen[n as usize] = true;
        }
    }

    if !duplicates.is_empty() {
        return Err(Error::marker_invalid(format!(
            "duplicate page markers: {:?}",
            duplicates
        )));
    }
    if !extra.is_empty() {
        return Err(Error::marker_invalid(format!(
            "unexpected page markers: {:?}",
            extra
        )));
    }

    let missing: Vec<u32> = (1..=expected).filter(|&n| !seen[n as usize]).collect();
    if !missing.is_empty() {
        return Err(Error::marker_invalid(format!(
            "missing page markers: {:?}",
            missing
        )));
    }

    if found.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::marker_invalid(format!(
            "page markers out of order: {:?}",
            found
        )));
    }

    Ok(())
}
