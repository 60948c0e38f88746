//! Chunk derivation over page bodies.
//!
//! Splits each page's body (the page span minus its marker line) into
//! ordered [`ChunkSpan`]s under one of three policies:
//!
//! - `chars` — fixed windows advancing by `chunk_size - overlap`;
//! - `paragraph` — window ends snap forward to the nearest paragraph
//!   boundary (double newline, falling back to single newline) at or after
//!   the size target, never before;
//! - `heading` — heading-like line starts are preferred boundaries, with
//!   the paragraph policy as fallback.
//!
//! Chunks never cross a page boundary. Undersized chunks are emitted with a
//! [`CHUNK_TOO_SHORT`] warning instead of being dropped, so every character
//! of every page body is covered by at least one chunk. Splitting is
//! deterministic: identical inputs yield identical spans.

use std::sync::OnceLock;

use regex::Regex;

use crate::hashing::hash_chunk;
use crate::models::{ChunkSpan, ChunkStrategy, PageSpan, SplitMode};
use crate::spans::body_start;

/// Chunks whose trimmed text is shorter than this carry [`CHUNK_TOO_SHORT`].
pub const MIN_VIABLE_CHUNK_LEN: usize = 10;

/// Warning attached to chunks below [`MIN_VIABLE_CHUNK_LEN`].
pub const CHUNK_TOO_SHORT: &str = "CHUNK_TOO_SHORT";

/// How far past the size target a boundary may be before the raw target
/// offset is used instead.
const BOUNDARY_WINDOW: usize = 200;

fn heading_numbered_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "1. ", "2.3 ", "4.5.6. " at line start.
    RE.get_or_init(|| Regex::new(r"(?m)^\d+(?:\.\d+)*\.?[ \t]").expect("valid regex"))
}

fn heading_markdown_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}[ \t]").expect("valid regex"))
}

fn heading_caps_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Short all-caps lines such as "INTRODUCTION" or "PART TWO".
    RE.get_or_init(|| Regex::new(r"(?m)^[A-Z][A-Z \t]{2,50}$").expect("valid regex"))
}

fn double_newline_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\n+").expect("valid regex"))
}

/// Derive all chunk spans for a document, page by page.
///
/// Offsets in the returned spans are absolute positions in `text`. Within a
/// page, chunks are ordered by ascending start and the `chunk_id` index
/// reflects that order.
pub fn split_pages(
    text: &str,
    page_spans: &[PageSpan],
    strategy: &ChunkStrategy,
    doc_id: &str,
) -> Vec<ChunkSpan> {
    let mut chunks = Vec::new();

    for span in page_spans {
        let content_start = body_start(text, span);
        let body = &text[content_start..span.end];

        for (idx, (local_start, local_end)) in split_body(body, strategy).into_iter().enumerate() {
            let start = content_start + local_start;
            let end = content_start + local_end;
            let chunk_text = &text[start..end];
            let chunk_id = format!("P{:03}-C{:03}", span.page_no, idx);

            let mut warnings = Vec::new();
            if chunk_text.trim().len() < MIN_VIABLE_CHUNK_LEN {
                warnings.push(CHUNK_TOO_SHORT.to_string());
            }

            chunks.push(ChunkSpan {
                hash: hash_chunk(doc_id, &chunk_id, chunk_text),
                chunk_id,
                page_no: span.page_no,
                start,
                end,
                char_len: end - start,
                warnings,
            });
        }
    }

    chunks
}

/// Split one page body into local `(start, end)` ranges per the strategy.
pub fn split_body(body: &str, strategy: &ChunkStrategy) -> Vec<(usize, usize)> {
    match strategy.split_mode {
        SplitMode::Chars => split_chars(body, strategy.chunk_size, strategy.overlap),
        SplitMode::Paragraph => {
            let (strong, weak) = paragraph_boundaries(body);
            split_at_boundaries(body, strategy, &[&strong, &weak])
        }
        SplitMode::Heading => {
            let headings = heading_boundaries(body);
            let (strong, weak) = paragraph_boundaries(body);
            split_at_boundaries(body, strategy, &[&headings, &strong, &weak])
        }
    }
}

/// Fixed-size windows. The final window is truncated to the body end; a body
/// shorter than `chunk_size` yields exactly one chunk.
fn split_chars(body: &str, chunk_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    if body.is_empty() {
        return Vec::new();
    }

    let len = body.len();
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < len {
        let end = ceil_char(body, (pos + chunk_size).min(len));
        chunks.push((pos, end));
        if end >= len {
            break;
        }
        pos = ceil_char(body, pos + step);
    }

    chunks
}

/// Boundary-snapping split shared by the paragraph and heading modes.
///
/// `tiers` lists boundary sets in preference order; the chunk end snaps to
/// the first boundary at or after the size target, trying each tier in turn
/// within [`BOUNDARY_WINDOW`]. The next chunk's start is the end rewound by
/// `overlap` and re-snapped forward to any boundary.
fn split_at_boundaries(
    body: &str,
    strategy: &ChunkStrategy,
    tiers: &[&[usize]],
) -> Vec<(usize, usize)> {
    if body.is_empty() {
        return Vec::new();
    }

    let len = body.len();
    let mut all: Vec<usize> = tiers.iter().flat_map(|t| t.iter().copied()).collect();
    all.sort_unstable();
    all.dedup();

    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < len {
        let target = pos + strategy.chunk_size;
        if target >= len {
            chunks.push((pos, len));
            break;
        }
        let target = ceil_char(body, target);

        let limit = (target + BOUNDARY_WINDOW).min(len);
        let end = tiers
            .iter()
            .find_map(|tier| snap_forward(tier, target, limit))
            .unwrap_or(target);

        chunks.push((pos, end));
        if end >= len {
            break;
        }

        // Rewind by the overlap and re-snap the start to a boundary. The
        // snapped start never exceeds `end`, so coverage stays gap-free.
        let rewind = ceil_char(body, end.saturating_sub(strategy.overlap));
        let mut next = snap_forward(&all, rewind, end).unwrap_or(rewind);
        if next <= pos {
            next = end;
        }
        pos = next;
    }

    chunks
}

/// First boundary in `[from, limit]`, if any. Boundaries must be sorted.
fn snap_forward(boundaries: &[usize], from: usize, limit: usize) -> Option<usize> {
    let idx = boundaries.partition_point(|&b| b < from);
    match boundaries.get(idx) {
        Some(&b) if b <= limit => Some(b),
        _ => None,
    }
}

/// Paragraph boundary positions: ends of blank-line runs (strong) and ends
/// of single newlines (weak).
fn paragraph_boundaries(body: &str) -> (Vec<usize>, Vec<usize>) {
    let strong: Vec<usize> = double_newline_re()
        .find_iter(body)
        .map(|m| m.end())
        .collect();

    let weak: Vec<usize> = body
        .bytes()
        .enumerate()
        .filter(|(_, b)| *b == b'\n')
        .map(|(i, _)| i + 1)
        .collect();

    (strong, weak)
}

/// Start offsets of heading-like lines: numbered headers, markdown headers,
/// and short all-caps lines.
fn heading_boundaries(body: &str) -> Vec<usize> {
    let mut boundaries: Vec<usize> = heading_numbered_re()
        .find_iter(body)
        .chain(heading_markdown_re().find_iter(body))
        .chain(heading_caps_re().find_iter(body))
        .map(|m| m.start())
        .collect();
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries
}

/// Round `i` up to the next UTF-8 character boundary.
fn ceil_char(s: &str, mut i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::build_text;
    use crate::models::RawPage;
    use crate::spans::build_page_spans;

    fn strategy(chunk_size: usize, overlap: usize, split_mode: SplitMode) -> ChunkStrategy {
        ChunkStrategy {
            chunk_size,
            overlap,
            split_mode,
            normalize: false,
        }
    }

    fn one_page(text: &str) -> (String, Vec<RawPage>) {
        let pages = vec![RawPage {
            page_no: 1,
            text: text.to_string(),
        }];
        (build_text(&pages), pages)
    }

    #[test]
    fn test_chars_mode_window_starts() {
        // 25-char body, size 10, overlap 2: step 8, starts 0/8/16, last
        // chunk truncated to the remaining 9 characters.
        let body = "abcdefghijklmnopqrstuvwxy";
        let chunks = split_body(body, &strategy(10, 2, SplitMode::Chars));
        assert_eq!(chunks, vec![(0, 10), (8, 18), (16, 25)]);
    }

    #[test]
    fn test_chars_mode_short_body_single_chunk() {
        let chunks = split_body("tiny", &strategy(100, 10, SplitMode::Chars));
        assert_eq!(chunks, vec![(0, 4)]);
    }

    #[test]
    fn test_chars_mode_empty_body() {
        assert!(split_body("", &strategy(100, 10, SplitMode::Chars)).is_empty());
    }

    #[test]
    fn test_chars_mode_no_overlap() {
        let body = "a".repeat(30);
        let chunks = split_body(&body, &strategy(10, 0, SplitMode::Chars));
        assert_eq!(chunks, vec![(0, 10), (10, 20), (20, 30)]);
    }

    #[test]
    fn test_paragraph_mode_snaps_forward_only() {
        // Strong boundary (double newline) shortly after the target: the
        // chunk end must land on it, not on an earlier boundary.
        let body = format!("{}\n\n{}", "a".repeat(110), "b".repeat(200));
        let chunks = split_body(&body, &strategy(100, 0, SplitMode::Paragraph));
        // Target is 100; the boundary after "a"*110 + "\n\n" is at 112.
        assert_eq!(chunks[0], (0, 112));
        for pair in chunks.windows(2) {
            assert!(
                pair[1].0 >= pair[0].0 + 1,
                "chunk starts must strictly advance"
            );
            assert!(pair[1].0 <= pair[0].1, "no gaps between chunks");
        }
    }

    #[test]
    fn test_paragraph_mode_weak_fallback() {
        // No double newlines at all: single-newline ends are used.
        let line = "x".repeat(50);
        let body = format!("{line}\n{line}\n{line}\n{line}");
        let chunks = split_body(&body, &strategy(120, 0, SplitMode::Paragraph));
        // Target 120 snaps forward to the newline end at 153.
        assert_eq!(chunks[0], (0, 153));
    }

    #[test]
    fn test_paragraph_mode_raw_target_when_no_boundary() {
        let body = "z".repeat(400);
        let chunks = split_body(&body, &strategy(150, 0, SplitMode::Paragraph));
        assert_eq!(chunks, vec![(0, 150), (150, 300), (300, 400)]);
    }

    #[test]
    fn test_paragraph_mode_overlap_rewinds_start() {
        let para = "p".repeat(120);
        let body = format!("{para}\n\n{para}\n\n{para}");
        let chunks = split_body(&body, &strategy(100, 40, SplitMode::Paragraph));

        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let (prev_start, prev_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start > prev_start);
            assert!(next_start <= prev_end, "overlap must not create a gap");
        }
        // Full coverage of the body.
        assert_eq!(chunks[0].0, 0);
        assert_eq!(chunks.last().unwrap().1, body.len());
    }

    #[test]
    fn test_heading_mode_prefers_heading_boundary() {
        let body = format!(
            "{}\n\n# Section Two\n{}",
            "intro ".repeat(20).trim_end(),
            "body ".repeat(40)
        );
        let heading_at = body.find("# Section").unwrap();
        let chunks = split_body(&body, &strategy(100, 0, SplitMode::Heading));
        // First boundary at or after the 100-char target is the heading
        // line start.
        assert_eq!(chunks[0].1, heading_at);
    }

    #[test]
    fn test_heading_mode_falls_back_to_paragraphs() {
        // No headings anywhere: the paragraph boundary after the target
        // (110 chars of body + blank line = offset 112) wins.
        let para = "w".repeat(110);
        let body = format!("{para}\n\n{para}");
        let chunks = split_body(&body, &strategy(100, 0, SplitMode::Heading));
        assert_eq!(chunks[0], (0, 112));
    }

    #[test]
    fn test_heading_boundary_detection() {
        let body = "1. Intro\nsome text\n2.1 Details\nmore\n# Md\nINTRODUCTION\nlower";
        let bounds = heading_boundaries(body);
        assert!(bounds.contains(&0)); // "1. Intro"
        assert!(bounds.contains(&body.find("2.1 ").unwrap()));
        assert!(bounds.contains(&body.find("# Md").unwrap()));
        assert!(bounds.contains(&body.find("INTRODUCTION").unwrap()));
        assert!(!bounds.contains(&body.find("lower").unwrap()));
    }

    #[test]
    fn test_split_pages_ids_and_offsets() {
        let pages = vec![
            RawPage {
                page_no: 1,
                text: "abcdefghijklmnopqrstuvwxy".to_string(),
            },
            RawPage {
                page_no: 2,
                text: "0123456789".to_string(),
            },
        ];
        let text = build_text(&pages);
        let spans = build_page_spans(&text, &pages, "doc1").unwrap();
        let chunks = split_pages(&text, &spans, &strategy(10, 2, SplitMode::Chars), "doc1");

        let page1: Vec<_> = chunks.iter().filter(|c| c.page_no == 1).collect();
        assert_eq!(page1[0].chunk_id, "P001-C000");
        assert_eq!(page1[1].chunk_id, "P001-C001");
        assert_eq!(page1[2].chunk_id, "P001-C002");

        // Chunk offsets are absolute and never include marker text.
        for chunk in &chunks {
            let span = spans.iter().find(|s| s.page_no == chunk.page_no).unwrap();
            assert!(chunk.start >= span.start && chunk.end <= span.end);
            assert!(!text[chunk.start..chunk.end].contains("<<<PAGE:"));
            assert_eq!(chunk.char_len, chunk.end - chunk.start);
        }

        // Page 2's body is exactly one window wide.
        let page2: Vec<_> = chunks.iter().filter(|c| c.page_no == 2).collect();
        assert_eq!(page2.len(), 1);
        assert_eq!(page2[0].chunk_id, "P002-C000");
    }

    #[test]
    fn test_short_chunk_warning() {
        let (text, pages) = one_page("tiny");
        let spans = build_page_spans(&text, &pages, "doc1").unwrap();
        let chunks = split_pages(&text, &spans, &strategy(100, 0, SplitMode::Chars), "doc1");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].warnings, vec![CHUNK_TOO_SHORT.to_string()]);
    }

    #[test]
    fn test_split_is_deterministic() {
        let body = format!(
            "# One\n{}\n\n## Two\n{}\n{}",
            "alpha ".repeat(60),
            "beta ".repeat(60),
            "gamma ".repeat(60)
        );
        let (text, pages) = one_page(&body);
        let spans = build_page_spans(&text, &pages, "doc1").unwrap();
        let strat = strategy(150, 30, SplitMode::Heading);

        let a = split_pages(&text, &spans, &strat, "doc1");
        let b = split_pages(&text, &spans, &strat, "doc1");
        assert_eq!(a, b);
    }

    #[test]
    fn test_coverage_no_gaps_every_mode() {
        let body = format!(
            "SECTION ONE\n{}\n\n1.2 Subsection\n{}\n\n{}",
            "text ".repeat(80),
            "more ".repeat(80),
            "tail ".repeat(30)
        );
        for mode in [SplitMode::Chars, SplitMode::Paragraph, SplitMode::Heading] {
            let chunks = split_body(&body, &strategy(200, 50, mode));
            assert_eq!(chunks[0].0, 0, "{mode}: must start at body start");
            assert_eq!(
                chunks.last().unwrap().1,
                body.len(),
                "{mode}: must reach body end"
            );
            for pair in chunks.windows(2) {
                assert!(
                    pair[1].0 <= pair[0].1,
                    "{mode}: gap between {:?} and {:?}",
                    pair[0],
                    pair[1]
                );
            }
        }
    }

    #[test]
    fn test_multibyte_bodies_stay_on_char_boundaries() {
        let body = "é".repeat(200); // 2 bytes per char
        for mode in [SplitMode::Chars, SplitMode::Paragraph, SplitMode::Heading] {
            for (start, end) in split_body(&body, &strategy(101, 7, mode)) {
                assert!(body.is_char_boundary(start));
                assert!(body.is_char_boundary(end));
            }
        }
    }
}
