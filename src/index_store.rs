//! Index store: where content-addressed chunk records land.
//!
//! The [`IndexStore`] trait is the boundary to the search engine. Records
//! are keyed by their content hash, so writing the same chunk content twice
//! produces one record, not two; that is what makes re-committing a session
//! idempotent.
//!
//! Two implementations ship:
//! - [`SqliteIndexStore`] — indices and records in SQLite, vectors as
//!   little-endian f32 BLOBs;
//! - [`MemoryIndexStore`] — in-process maps, used by tests and as the model
//!   for what any remote engine must provide.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::errors::{Error, Result};
use crate::models::{ChunkMetadata, ChunkStrategy};

/// One committed chunk, keyed by its content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub hash: String,
    pub doc_id: String,
    pub session_id: String,
    pub chunk_id: String,
    pub page_no: u32,
    pub start: usize,
    pub end: usize,
    pub char_len: usize,
    pub text: String,
    #[serde(default)]
    pub vector: Vec<f32>,
    pub metadata: ChunkMetadata,
    pub chunk_strategy: ChunkStrategy,
    pub extractor_version: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub committed_at: DateTime<Utc>,
}

/// Summary of one physical index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    pub index_name: String,
    pub dimension: usize,
    pub record_count: u64,
}

/// A scored search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub record: IndexRecord,
}

/// Storage/search engine boundary for committed chunk records.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn exists(&self, index_name: &str) -> Result<bool>;

    /// Create an index that will hold vectors of the given dimension.
    async fn create(&self, index_name: &str, dimension: usize) -> Result<()>;

    /// The recorded vector dimension, or `None` if the index doesn't exist.
    async fn dimension(&self, index_name: &str) -> Result<Option<usize>>;

    /// Upsert records keyed by content hash. Idempotent.
    async fn write(&self, index_name: &str, records: &[IndexRecord]) -> Result<()>;

    /// Drop an index and its records. Returns whether it existed.
    async fn delete(&self, index_name: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<IndexInfo>>;

    /// Case-insensitive text match, scored by term frequency.
    async fn search_text(
        &self,
        index_name: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Cosine-similarity match against stored vectors.
    async fn search_vector(
        &self,
        index_name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>>;
}

/// Weighted merge of text and vector hits for hybrid search.
///
/// `alpha` weights the vector score; text scores are normalized to the best
/// text hit first. Hits found by both searches get the blended score, hits
/// found by one keep their weighted share. Deterministic: ties break on the
/// record hash.
pub fn merge_hybrid(
    text_hits: Vec<SearchHit>,
    vector_hits: Vec<SearchHit>,
    alpha: f64,
    top_k: usize,
) -> Vec<SearchHit> {
    let max_text = text_hits
        .iter()
        .map(|h| h.score)
        .fold(f64::MIN, f64::max)
        .max(1.0);

    let mut merged: BTreeMap<String, SearchHit> = BTreeMap::new();
    for hit in text_hits {
        let score = (1.0 - alpha) * hit.score / max_text;
        merged.insert(
            hit.record.hash.clone(),
            SearchHit {
                score,
                record: hit.record,
            },
        );
    }
    for hit in vector_hits {
        let add = alpha * hit.score;
        merged
            .entry(hit.record.hash.clone())
            .and_modify(|h| h.score += add)
            .or_insert(SearchHit {
                score: add,
                record: hit.record,
            });
    }

    let mut hits: Vec<SearchHit> = merged.into_values().collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.hash.cmp(&b.record.hash))
    });
    hits.truncate(top_k);
    hits
}

fn frequency_score(text: &str, query: &str) -> f64 {
    let haystack = text.to_lowercase();
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return 0.0;
    }
    haystack.matches(&needle).count() as f64
}

fn sort_hits(hits: &mut Vec<SearchHit>, top_k: usize) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.record.hash.cmp(&b.record.hash))
    });
    hits.truncate(top_k);
}

// ============ SQLite implementation ============

/// Index store over the shared SQLite database.
///
/// Index metadata lives in `indices`; records in `index_records` with a
/// `(index_name, hash)` primary key and the vector stored as a BLOB next to
/// the JSON payload.
pub struct SqliteIndexStore {
    pool: SqlitePool,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn require_index(&self, index_name: &str) -> Result<()> {
        if !self.exists(index_name).await? {
            return Err(Error::IndexNotFound(index_name.to_string()));
        }
        Ok(())
    }

    async fn load_records(&self, index_name: &str) -> Result<Vec<IndexRecord>> {
        let rows = sqlx::query(
            "SELECT payload, vector FROM index_records WHERE index_name = ? ORDER BY hash",
        )
        .bind(index_name)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            let blob: Vec<u8> = row.get("vector");
            let mut record: IndexRecord = serde_json::from_str(&payload)?;
            record.vector = blob_to_vec(&blob);
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn exists(&self, index_name: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM indices WHERE name = ?")
            .bind(index_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn create(&self, index_name: &str, dimension: usize) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO indices (name, dimension, created_at) VALUES (?, ?, ?)")
            .bind(index_name)
            .bind(dimension as i64)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn dimension(&self, index_name: &str) -> Result<Option<usize>> {
        let dim: Option<i64> =
            sqlx::query_scalar("SELECT dimension FROM indices WHERE name = ?")
                .bind(index_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dim.map(|d| d as usize))
    }

    async fn write(&self, index_name: &str, records: &[IndexRecord]) -> Result<()> {
        self.require_index(index_name).await?;

        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp();

        for record in records {
            let blob = vec_to_blob(&record.vector);
            // The vector travels in its own column; blank it in the payload
            // so it is not stored twice.
            let mut stripped = record.clone();
            stripped.vector = Vec::new();
            let payload = serde_json::to_string(&stripped)?;

            sqlx::query(
                r#"
                INSERT INTO index_records
                    (index_name, hash, chunk_id, doc_id, session_id, text, payload, vector, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(index_name, hash) DO UPDATE SET
                    chunk_id = excluded.chunk_id,
                    doc_id = excluded.doc_id,
                    session_id = excluded.session_id,
                    text = excluded.text,
                    payload = excluded.payload,
                    vector = excluded.vector,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(index_name)
            .bind(&record.hash)
            .bind(&record.chunk_id)
            .bind(&record.doc_id)
            .bind(&record.session_id)
            .bind(&record.text)
            .bind(&payload)
            .bind(&blob)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, index_name: &str) -> Result<bool> {
        if !self.exists(index_name).await? {
            return Ok(false);
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM index_records WHERE index_name = ?")
            .bind(index_name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM indices WHERE name = ?")
            .bind(index_name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<IndexInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT i.name, i.dimension, COUNT(r.hash) AS record_count
            FROM indices i
            LEFT JOIN index_records r ON r.index_name = i.name
            GROUP BY i.name, i.dimension
            ORDER BY i.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| IndexInfo {
                index_name: row.get("name"),
                dimension: row.get::<i64, _>("dimension") as usize,
                record_count: row.get::<i64, _>("record_count") as u64,
            })
            .collect())
    }

    async fn search_text(
        &self,
        index_name: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        self.require_index(index_name).await?;

        let pattern = format!("%{}%", query.to_lowercase());
        let rows = sqlx::query(
            r#"
            SELECT payload, vector FROM index_records
            WHERE index_name = ? AND lower(text) LIKE ?
            ORDER BY hash
            "#,
        )
        .bind(index_name)
        .bind(&pattern)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.get("payload");
            let blob: Vec<u8> = row.get("vector");
            let mut record: IndexRecord = serde_json::from_str(&payload)?;
            record.vector = blob_to_vec(&blob);
            hits.push(SearchHit {
                score: frequency_score(&record.text, query),
                record,
            });
        }
        sort_hits(&mut hits, top_k);
        Ok(hits)
    }

    async fn search_vector(
        &self,
        index_name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        self.require_index(index_name).await?;

        let mut hits: Vec<SearchHit> = self
            .load_records(index_name)
            .await?
            .into_iter()
            .map(|record| SearchHit {
                score: cosine_similarity(vector, &record.vector) as f64,
                record,
            })
            .collect();
        sort_hits(&mut hits, top_k);
        Ok(hits)
    }
}

// ============ In-memory implementation ============

struct MemoryIndex {
    dimension: usize,
    records: BTreeMap<String, IndexRecord>,
}

/// In-process index store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryIndexStore {
    indices: Mutex<BTreeMap<String, MemoryIndex>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn exists(&self, index_name: &str) -> Result<bool> {
        Ok(self.indices.lock().unwrap().contains_key(index_name))
    }

    async fn create(&self, index_name: &str, dimension: usize) -> Result<()> {
        self.indices
            .lock()
            .unwrap()
            .entry(index_name.to_string())
            .or_insert_with(|| MemoryIndex {
                dimension,
                records: BTreeMap::new(),
            });
        Ok(())
    }

    async fn dimension(&self, index_name: &str) -> Result<Option<usize>> {
        Ok(self
            .indices
            .lock()
            .unwrap()
            .get(index_name)
            .map(|i| i.dimension))
    }

    async fn write(&self, index_name: &str, records: &[IndexRecord]) -> Result<()> {
        let mut indices = self.indices.lock().unwrap();
        let index = indices
            .get_mut(index_name)
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))?;
        for record in records {
            index.records.insert(record.hash.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, index_name: &str) -> Result<bool> {
        Ok(self.indices.lock().unwrap().remove(index_name).is_some())
    }

    async fn list(&self) -> Result<Vec<IndexInfo>> {
        Ok(self
            .indices
            .lock()
            .unwrap()
            .iter()
            .map(|(name, index)| IndexInfo {
                index_name: name.clone(),
                dimension: index.dimension,
                record_count: index.records.len() as u64,
            })
            .collect())
    }

    async fn search_text(
        &self,
        index_name: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let indices = self.indices.lock().unwrap();
        let index = indices
            .get(index_name)
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))?;

        let mut hits: Vec<SearchHit> = index
            .records
            .values()
            .filter_map(|record| {
                let score = frequency_score(&record.text, query);
                (score > 0.0).then(|| SearchHit {
                    score,
                    record: record.clone(),
                })
            })
            .collect();
        sort_hits(&mut hits, top_k);
        Ok(hits)
    }

    async fn search_vector(
        &self,
        index_name: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let indices = self.indices.lock().unwrap();
        let index = indices
            .get(index_name)
            .ok_or_else(|| Error::IndexNotFound(index_name.to_string()))?;

        let mut hits: Vec<SearchHit> = index
            .records
            .values()
            .map(|record| SearchHit {
                score: cosine_similarity(vector, &record.vector) as f64,
                record: record.clone(),
            })
            .collect();
        sort_hits(&mut hits, top_k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hash: &str, text: &str, vector: Vec<f32>) -> IndexRecord {
        IndexRecord {
            hash: hash.to_string(),
            doc_id: "doc1".to_string(),
            session_id: "s1".to_string(),
            chunk_id: "P001-C000".to_string(),
            page_no: 1,
            start: 13,
            end: 13 + text.len(),
            char_len: text.len(),
            text: text.to_string(),
            vector,
            metadata: ChunkMetadata::default(),
            chunk_strategy: ChunkStrategy::default(),
            extractor_version: "0.0".to_string(),
            embedding_model: "test-model".to_string(),
            embedding_dimension: 2,
            committed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_write_is_idempotent_by_hash() {
        let store = MemoryIndexStore::new();
        store.create("idx", 2).await.unwrap();

        let r = record("h1", "same content", vec![1.0, 0.0]);
        store.write("idx", &[r.clone()]).await.unwrap();
        store.write("idx", &[r]).await.unwrap();

        let info = store.list().await.unwrap();
        assert_eq!(info[0].record_count, 1);
    }

    #[tokio::test]
    async fn test_memory_write_requires_index() {
        let store = MemoryIndexStore::new();
        let err = store
            .write("missing", &[record("h", "t", vec![])])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INDEX_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_memory_text_search_ranks_by_frequency() {
        let store = MemoryIndexStore::new();
        store.create("idx", 2).await.unwrap();
        store
            .write(
                "idx",
                &[
                    record("h1", "rust rust rust", vec![1.0, 0.0]),
                    record("h2", "rust once", vec![0.0, 1.0]),
                    record("h3", "nothing relevant", vec![0.5, 0.5]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search_text("idx", "rust", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.hash, "h1");
        assert_eq!(hits[1].record.hash, "h2");
    }

    #[tokio::test]
    async fn test_memory_vector_search_orders_by_cosine() {
        let store = MemoryIndexStore::new();
        store.create("idx", 2).await.unwrap();
        store
            .write(
                "idx",
                &[
                    record("h1", "a", vec![1.0, 0.0]),
                    record("h2", "b", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let hits = store.search_vector("idx", &[0.9, 0.1], 10).await.unwrap();
        assert_eq!(hits[0].record.hash, "h1");
    }

    #[test]
    fn test_merge_hybrid_blends_scores() {
        let both = record("both", "x", vec![1.0, 0.0]);
        let text_only = record("text", "x", vec![0.0, 1.0]);
        let vec_only = record("vec", "x", vec![1.0, 1.0]);

        let text_hits = vec![
            SearchHit {
                score: 4.0,
                record: both.clone(),
            },
            SearchHit {
                score: 2.0,
                record: text_only,
            },
        ];
        let vector_hits = vec![
            SearchHit {
                score: 0.9,
                record: both,
            },
            SearchHit {
                score: 0.8,
                record: vec_only,
            },
        ];

        let merged = merge_hybrid(text_hits, vector_hits, 0.6, 10);
        assert_eq!(merged[0].record.hash, "both");
        // 0.4 * (4/4) + 0.6 * 0.9
        assert!((merged[0].score - 0.94).abs() < 1e-9);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_hybrid_respects_top_k() {
        let hits: Vec<SearchHit> = (0..5)
            .map(|i| SearchHit {
                score: i as f64,
                record: record(&format!("h{}", i), "x", vec![]),
            })
            .collect();
        let merged = merge_hybrid(hits, Vec::new(), 0.5, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].record.hash, "h4");
    }
}
