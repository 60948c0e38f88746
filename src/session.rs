//! Session lifecycle and the versioned mutation pipeline.
//!
//! A [`Session`] is created once at ingestion and then mutated only through
//! [`Session::apply_text_edit`] and [`Session::apply_strategy_edit`]. Every
//! mutation runs the same pipeline:
//!
//! 1. validate the caller's version against the session (optimistic lock);
//! 2. apply the edit (decode edited text, or swap the strategy);
//! 3. normalize pages when the strategy asks for it;
//! 4. re-encode the marked text;
//! 5. re-derive page spans and chunk spans;
//! 6. re-address every chunk;
//! 7. commit everything as one new revision, bumping the version by one.
//!
//! All derived state is computed into a [`Derived`] value before any session
//! field changes, so a failure at any step leaves the session untouched.
//! Re-derivation is pure, synchronous CPU work; persistence happens in
//! [`crate::store`], not here.

use chrono::Utc;
use uuid::Uuid;

use crate::chunk::split_pages;
use crate::errors::{Error, Result};
use crate::marker::{build_text, parse_text};
use crate::models::{
    ChunkMetadata, ChunkSpan, ChunkStrategy, ExtractMeta, PageSpan, RawPage, Session,
};
use crate::normalize::normalize_pages;
use crate::spans::build_page_spans;

/// Everything a mutation replaces, computed up front.
struct Derived {
    current_pages: Vec<RawPage>,
    current_text: String,
    page_spans: Vec<PageSpan>,
    chunk_spans: Vec<ChunkSpan>,
}

impl Derived {
    /// Run steps 3-6 of the pipeline: normalize, encode, index, chunk,
    /// address.
    fn compute(doc_id: &str, pages: Vec<RawPage>, strategy: &ChunkStrategy) -> Result<Derived> {
        let current_pages = if strategy.normalize {
            normalize_pages(&pages)
        } else {
            pages
        };

        let current_text = build_text(&current_pages);
        let page_spans = build_page_spans(&current_text, &current_pages, doc_id)?;
        let chunk_spans = split_pages(&current_text, &page_spans, strategy, doc_id);

        Ok(Derived {
            current_pages,
            current_text,
            page_spans,
            chunk_spans,
        })
    }
}

fn validate_page_numbering(pages: &[RawPage]) -> Result<()> {
    for (i, page) in pages.iter().enumerate() {
        if page.page_no != i as u32 + 1 {
            return Err(Error::Validation(format!(
                "pages must be numbered contiguously from 1; position {} has page_no {}",
                i, page.page_no
            )));
        }
    }
    Ok(())
}

/// Create a new session from extracted pages at version 1.
pub fn create_session(
    doc_id: impl Into<String>,
    base_pages: Vec<RawPage>,
    extract_meta: ExtractMeta,
    strategy: ChunkStrategy,
) -> Result<Session> {
    strategy.validate()?;
    validate_page_numbering(&base_pages)?;
    let doc_id = doc_id.into();
    let derived = Derived::compute(&doc_id, base_pages.clone(), &strategy)?;

    let now = Utc::now();
    Ok(Session {
        session_id: Uuid::new_v4().to_string(),
        doc_id,
        extract_meta,
        base_pages,
        current_pages: derived.current_pages,
        current_text: derived.current_text,
        page_spans: derived.page_spans,
        chunk_strategy: strategy,
        chunk_spans: derived.chunk_spans,
        chunk_metadata: Default::default(),
        version: 1,
        created_at: now,
        updated_at: now,
    })
}

impl Session {
    fn check_version(&self, expected: u64) -> Result<()> {
        if expected != self.version {
            return Err(Error::VersionConflict {
                expected,
                actual: self.version,
            });
        }
        Ok(())
    }

    fn commit(&mut self, derived: Derived) {
        self.current_pages = derived.current_pages;
        self.current_text = derived.current_text;
        self.page_spans = derived.page_spans;
        self.chunk_spans = derived.chunk_spans;
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Replace the full text with a user-edited version.
    ///
    /// The edited text is decoded against the session's page count; marker
    /// tampering fails with [`Error::MarkerInvalid`] and a stale `version`
    /// with [`Error::VersionConflict`], in both cases leaving the session
    /// unchanged.
    pub fn apply_text_edit(&mut self, version: u64, text: &str) -> Result<()> {
        self.check_version(version)?;
        let pages = parse_text(text, self.extract_meta.page_count)?;
        let derived = Derived::compute(&self.doc_id, pages, &self.chunk_strategy)?;
        self.commit(derived);
        Ok(())
    }

    /// Replace the chunk strategy and re-derive all spans.
    ///
    /// Pages are rebuilt from the immutable base set, not the current one:
    /// strategy changes apply uniformly to the original extraction, and any
    /// text edits not separately persisted are discarded by design.
    pub fn apply_strategy_edit(&mut self, version: u64, strategy: ChunkStrategy) -> Result<()> {
        self.check_version(version)?;
        strategy.validate()?;
        let derived = Derived::compute(&self.doc_id, self.base_pages.clone(), &strategy)?;
        self.chunk_strategy = strategy;
        self.commit(derived);
        Ok(())
    }

    /// Look up a chunk span by id.
    pub fn chunk(&self, chunk_id: &str) -> Result<&ChunkSpan> {
        self.chunk_spans
            .iter()
            .find(|c| c.chunk_id == chunk_id)
            .ok_or_else(|| Error::ChunkNotFound {
                session_id: self.session_id.clone(),
                chunk_id: chunk_id.to_string(),
            })
    }

    /// The current text of a chunk, sliced from the marked text.
    pub fn chunk_text(&self, chunk: &ChunkSpan) -> &str {
        &self.current_text[chunk.start..chunk.end]
    }

    /// Metadata for a chunk, falling back to defaults when none was set.
    pub fn metadata_for(&self, chunk_id: &str) -> ChunkMetadata {
        self.chunk_metadata.get(chunk_id).cloned().unwrap_or_default()
    }

    /// Set a chunk's metadata. The chunk must exist in the current revision;
    /// the entry is created lazily and keyed by chunk id.
    pub fn set_chunk_metadata(&mut self, chunk_id: &str, metadata: ChunkMetadata) -> Result<()> {
        self.chunk(chunk_id)?;
        self.chunk_metadata.insert(chunk_id.to_string(), metadata);
        self.updated_at = Utc::now();
        Ok(())
    }
}
