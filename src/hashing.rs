//! Content addressing for pages and chunks.
//!
//! Digests are SHA-256 over a canonical `doc_id`/kind/id/text string, so the
//! same inputs always produce the same address across processes and over
//! time. Chunk digests double as the index store's record keys, which is
//! what makes repeated commits idempotent.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a string.
pub fn sha256_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Content address for a page: `{doc_id}:page:{page_no}:{text}`.
pub fn hash_page(doc_id: &str, page_no: u32, page_text: &str) -> String {
    sha256_text(&format!("{}:page:{}:{}", doc_id, page_no, page_text))
}

/// Content address for a chunk: `{doc_id}:chunk:{chunk_id}:{text}`.
pub fn hash_chunk(doc_id: &str, chunk_id: &str, chunk_text: &str) -> String {
    sha256_text(&format!("{}:chunk:{}:{}", doc_id, chunk_id, chunk_text))
}
