//! Core data models for sessions, spans, and chunks.
//!
//! These types flow through the whole pipeline: extraction produces
//! [`RawPage`]s, the marker codec turns them into one marked text stream,
//! and the chunk engine derives [`PageSpan`]s and [`ChunkSpan`]s over it.
//! A [`Session`] aggregates everything for one document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// A single page of extracted text. Pages are 1-indexed and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPage {
    pub page_no: u32,
    pub text: String,
}

/// Metadata about the extraction that produced a session's base pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractMeta {
    pub extractor_name: String,
    pub extractor_version: String,
    pub page_count: u32,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// How page bodies are split into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitMode {
    Chars,
    Paragraph,
    Heading,
}

impl std::fmt::Display for SplitMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SplitMode::Chars => write!(f, "chars"),
            SplitMode::Paragraph => write!(f, "paragraph"),
            SplitMode::Heading => write!(f, "heading"),
        }
    }
}

impl std::str::FromStr for SplitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chars" => Ok(SplitMode::Chars),
            "paragraph" => Ok(SplitMode::Paragraph),
            "heading" => Ok(SplitMode::Heading),
            other => Err(Error::InvalidStrategy(format!(
                "unknown split_mode: '{}'. Must be chars, paragraph, or heading.",
                other
            ))),
        }
    }
}

/// Parameters governing chunk derivation.
///
/// `chunk_size` is a character target in `[100, 10000]`; `overlap` is in
/// `[0, 1000]` and must stay below `chunk_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStrategy {
    pub chunk_size: usize,
    pub overlap: usize,
    pub split_mode: SplitMode,
    pub normalize: bool,
}

impl Default for ChunkStrategy {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            overlap: 100,
            split_mode: SplitMode::Paragraph,
            normalize: true,
        }
    }
}

impl ChunkStrategy {
    pub const MIN_CHUNK_SIZE: usize = 100;
    pub const MAX_CHUNK_SIZE: usize = 10_000;
    pub const MAX_OVERLAP: usize = 1_000;

    /// Check the documented bounds. Called before a strategy is applied to a
    /// session and when loading configuration.
    pub fn validate(&self) -> Result<()> {
        if !(Self::MIN_CHUNK_SIZE..=Self::MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(Error::InvalidStrategy(format!(
                "chunk_size must be in [{}, {}], got {}",
                Self::MIN_CHUNK_SIZE,
                Self::MAX_CHUNK_SIZE,
                self.chunk_size
            )));
        }
        if self.overlap > Self::MAX_OVERLAP {
            return Err(Error::InvalidStrategy(format!(
                "overlap must be in [0, {}], got {}",
                Self::MAX_OVERLAP,
                self.overlap
            )));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidStrategy(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A page's position inside the full marked text.
///
/// `start` points at the page's own marker line; `end` is the next marker's
/// offset (or the end of text for the last page). `char_len` counts only the
/// page body, excluding the marker line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub page_no: u32,
    pub start: usize,
    pub end: usize,
    pub char_len: usize,
    pub hash: String,
}

/// A chunk's position inside the full marked text, always contained in the
/// body range of exactly one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpan {
    /// `P{page:03}-C{index:03}`, index 0-based in ascending start order.
    pub chunk_id: String,
    pub page_no: u32,
    pub start: usize,
    pub end: usize,
    pub char_len: usize,
    pub hash: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Kind of content a chunk holds, per user assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Body,
    Table,
    Bullets,
    Caption,
    Other,
}

/// User quality assessment for a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    #[default]
    Good,
    Suspect,
    Broken,
}

/// User-editable annotation attached to a chunk id.
///
/// Never produced by the chunk engine; entries are created lazily on first
/// edit. Keyed by `chunk_id`, so a re-chunk that shifts boundaries does not
/// migrate metadata to the new ids. `custom` is an opaque extension bag
/// passed through unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub heading_path: String,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub quality_flag: QualityFlag,
    #[serde(default)]
    pub custom: serde_json::Map<String, serde_json::Value>,
}

/// Complete edit state for one document.
///
/// Created once at ingestion with `version = 1` and mutated exclusively
/// through the mutation methods in [`crate::session`]; every successful
/// mutation increments `version` by exactly one. `base_pages` is the
/// immutable snapshot captured at ingestion; everything else is derived from
/// the latest successfully parsed edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub doc_id: String,
    pub extract_meta: ExtractMeta,
    pub base_pages: Vec<RawPage>,
    pub current_pages: Vec<RawPage>,
    pub current_text: String,
    pub page_spans: Vec<PageSpan>,
    pub chunk_strategy: ChunkStrategy,
    pub chunk_spans: Vec<ChunkSpan>,
    #[serde(default)]
    pub chunk_metadata: BTreeMap<String, ChunkMetadata>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_validate_bounds() {
        assert!(ChunkStrategy::default().validate().is_ok());

        let too_small = ChunkStrategy {
            chunk_size: 50,
            ..ChunkStrategy::default()
        };
        assert!(too_small.validate().is_err());

        let too_big = ChunkStrategy {
            chunk_size: 20_000,
            ..ChunkStrategy::default()
        };
        assert!(too_big.validate().is_err());

        let overlap_too_big = ChunkStrategy {
            chunk_size: 2_000,
            overlap: 1_001,
            ..ChunkStrategy::default()
        };
        assert!(overlap_too_big.validate().is_err());
    }

    #[test]
    fn test_strategy_overlap_must_stay_below_chunk_size() {
        let s = ChunkStrategy {
            chunk_size: 100,
            overlap: 100,
            ..ChunkStrategy::default()
        };
        assert!(s.validate().is_err());

        let s = ChunkStrategy {
            chunk_size: 101,
            overlap: 100,
            ..ChunkStrategy::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_split_mode_parse_and_display() {
        assert_eq!(
            "paragraph".parse::<SplitMode>().unwrap(),
            SplitMode::Paragraph
        );
        assert_eq!(SplitMode::Chars.to_string(), "chars");
        assert!("semantic".parse::<SplitMode>().is_err());
    }

    #[test]
    fn test_split_mode_serde_lowercase() {
        let json = serde_json::to_string(&SplitMode::Heading).unwrap();
        assert_eq!(json, "\"heading\"");
        let back: SplitMode = serde_json::from_str("\"chars\"").unwrap();
        assert_eq!(back, SplitMode::Chars);
    }
}
