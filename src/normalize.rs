//! Light text normalization applied before span derivation.
//!
//! Unifies Windows line endings and collapses runs of blank lines. Spacing
//! inside lines is left alone so table-like extraction output keeps its
//! alignment. Normalization always runs before spans are computed, never
//! after, so derived offsets stay valid.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::RawPage;

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Three or more blank lines (lines holding only whitespace).
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"))
}

/// Normalize one text block: CRLF to LF, 3+ blank lines down to 2.
pub fn normalize_text(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    blank_run_re().replace_all(&text, "\n\n\n").into_owned()
}

/// Normalize every page's text, preserving page numbers.
pub fn normalize_pages(pages: &[RawPage]) -> Vec<RawPage> {
    pages
        .iter()
        .map(|page| RawPage {
            page_no: page.page_no,
            text: normalize_text(&page.text),
        })
        .collect()
}
