//! End-to-end tests over a temporary SQLite database: session lifecycle,
//! optimistic concurrency at the persistence boundary, idempotent index
//! writes, and commit job failure semantics.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use chunkforge::config::{Config, DbConfig, ServerConfig};
use chunkforge::errors::Error;
use chunkforge::index_router::ensure_index;
use chunkforge::index_store::{IndexRecord, IndexStore, SqliteIndexStore};
use chunkforge::jobs::{run_commit_job, JobRecord, JobStatus};
use chunkforge::models::{ChunkMetadata, ChunkStrategy, ExtractMeta, RawPage, SplitMode};
use chunkforge::session::create_session;
use chunkforge::{db, migrate, store};

fn test_config(root: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: root.path().join("forge.sqlite"),
        },
        chunking: Default::default(),
        embedding: Default::default(),
        index: Default::default(),
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    }
}

async fn setup() -> (TempDir, Config, sqlx::SqlitePool) {
    let root = TempDir::new().unwrap();
    let config = test_config(&root);
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (root, config, pool)
}

fn pages(texts: &[&str]) -> Vec<RawPage> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| RawPage {
            page_no: i as u32 + 1,
            text: t.to_string(),
        })
        .collect()
}

fn meta(page_count: u32) -> ExtractMeta {
    ExtractMeta {
        extractor_name: "test".to_string(),
        extractor_version: "0.0".to_string(),
        page_count,
        warnings: Vec::new(),
        created_at: chrono::Utc::now(),
    }
}

fn chars_strategy() -> ChunkStrategy {
    ChunkStrategy {
        chunk_size: 100,
        overlap: 10,
        split_mode: SplitMode::Chars,
        normalize: false,
    }
}

fn sample_record(hash: &str, text: &str) -> IndexRecord {
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
        vector: vec![1.0, 0.0],
        metadata: ChunkMetadata::default(),
        chunk_strategy: ChunkStrategy::default(),
        extractor_version: "0.0".to_string(),
        embedding_model: "test-model".to_string(),
        embedding_dimension: 2,
        committed_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_session_lifecycle_end_to_end() {
    let (_root, _config, pool) = setup().await;

    let session = create_session(
        "contract.pdf",
        pages(&["first page body text", "second page body text"]),
        meta(2),
        chars_strategy(),
    )
    .unwrap();
    store::insert_session(&pool, &session).await.unwrap();

    // Reload and edit the text through the versioned pipeline.
    let mut loaded = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(loaded.version, 1);
    assert_eq!(loaded.current_text, session.current_text);

    let edited = loaded.current_text.replace("first", "FIRST");
    loaded.apply_text_edit(1, &edited).unwrap();
    store::save_session(&pool, &loaded).await.unwrap();

    let reloaded = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(reloaded.version, 2);
    assert!(reloaded.current_text.contains("FIRST"));
    assert_eq!(reloaded.page_spans.len(), 2);
    assert!(!reloaded.chunk_spans.is_empty());

    // Strategy edit re-derives from base pages, discarding the text edit.
    let mut strategy_edit = reloaded.clone();
    strategy_edit
        .apply_strategy_edit(
            2,
            ChunkStrategy {
                split_mode: SplitMode::Paragraph,
                ..chars_strategy()
            },
        )
        .unwrap();
    store::save_session(&pool, &strategy_edit).await.unwrap();

    let final_state = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(final_state.version, 3);
    assert!(final_state.current_text.contains("first"));
    assert!(!final_state.current_text.contains("FIRST"));
}

#[tokio::test]
async fn test_concurrent_writers_last_validated_wins() {
    let (_root, _config, pool) = setup().await;

    let session = create_session(
        "doc",
        pages(&["page one content here", "page two content here"]),
        meta(2),
        chars_strategy(),
    )
    .unwrap();
    store::insert_session(&pool, &session).await.unwrap();

    // Two writers read the same revision.
    let mut writer_a = store::load_session(&pool, &session.session_id).await.unwrap();
    let mut writer_b = store::load_session(&pool, &session.session_id).await.unwrap();

    let text_a = writer_a.current_text.replace("one", "A");
    writer_a.apply_text_edit(1, &text_a).unwrap();
    store::save_session(&pool, &writer_a).await.unwrap();

    // The second writer validated against the same version; its save must
    // be rejected, not silently applied.
    let text_b = writer_b.current_text.replace("one", "B");
    writer_b.apply_text_edit(1, &text_b).unwrap();
    let err = store::save_session(&pool, &writer_b).await.unwrap_err();
    assert!(matches!(err, Error::VersionConflict { .. }));

    let stored = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(stored.version, 2);
    assert!(stored.current_text.contains("A"));

    // The loser retries against the fresh revision and succeeds.
    let mut retry = store::load_session(&pool, &session.session_id).await.unwrap();
    let text_retry = retry.current_text.replace("two", "B");
    retry.apply_text_edit(2, &text_retry).unwrap();
    store::save_session(&pool, &retry).await.unwrap();
    let stored = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(stored.version, 3);
}

#[tokio::test]
async fn test_chunk_metadata_survives_reload() {
    let (_root, _config, pool) = setup().await;

    let session = create_session(
        "doc",
        pages(&["enough body text to make a chunk"]),
        meta(1),
        chars_strategy(),
    )
    .unwrap();
    store::insert_session(&pool, &session).await.unwrap();

    let mut loaded = store::load_session(&pool, &session.session_id).await.unwrap();
    let chunk_id = loaded.chunk_spans[0].chunk_id.clone();
    let mut metadata = ChunkMetadata {
        note: "reviewed".to_string(),
        ..ChunkMetadata::default()
    };
    metadata
        .custom
        .insert("source".to_string(), serde_json::json!("import"));
    loaded.set_chunk_metadata(&chunk_id, metadata.clone()).unwrap();
    store::save_session_unversioned(&pool, &loaded).await.unwrap();

    let reloaded = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(reloaded.version, 1, "metadata edits do not bump the version");
    assert_eq!(reloaded.metadata_for(&chunk_id), metadata);
}

#[tokio::test]
async fn test_sqlite_index_write_is_idempotent() {
    let (_root, _config, pool) = setup().await;
    let index_store = SqliteIndexStore::new(pool.clone());

    ensure_index(&index_store, "forge-chunks__m", 2).await.unwrap();

    // Committing identical content twice produces one record, not two.
    let record = sample_record("hash-1", "identical chunk content");
    index_store.write("forge-chunks__m", &[record.clone()]).await.unwrap();
    index_store.write("forge-chunks__m", &[record]).await.unwrap();

    let info = index_store.list().await.unwrap();
    assert_eq!(info.len(), 1);
    assert_eq!(info[0].record_count, 1);
    assert_eq!(info[0].dimension, 2);

    // Changed content gets a new hash and therefore a second record.
    let other = sample_record("hash-2", "different chunk content");
    index_store.write("forge-chunks__m", &[other]).await.unwrap();
    let info = index_store.list().await.unwrap();
    assert_eq!(info[0].record_count, 2);
}

#[tokio::test]
async fn test_sqlite_index_dimension_reconciliation() {
    let (_root, _config, pool) = setup().await;
    let index_store = SqliteIndexStore::new(pool.clone());

    // New index name: always accepted.
    ensure_index(&index_store, "idx__small", 1536).await.unwrap();
    // Same dimension: fine.
    ensure_index(&index_store, "idx__small", 1536).await.unwrap();
    // Different dimension: rejected before any write.
    let err = ensure_index(&index_store, "idx__small", 3072).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { .. }));
}

#[tokio::test]
async fn test_sqlite_index_search_and_delete() {
    let (_root, _config, pool) = setup().await;
    let index_store = SqliteIndexStore::new(pool.clone());
    ensure_index(&index_store, "idx__m", 2).await.unwrap();

    let mut a = sample_record("ha", "rust is mentioned twice: rust");
    a.vector = vec![1.0, 0.0];
    let mut b = sample_record("hb", "nothing to see");
    b.vector = vec![0.0, 1.0];
    index_store.write("idx__m", &[a, b]).await.unwrap();

    let hits = index_store.search_text("idx__m", "rust", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].record.hash, "ha");

    let hits = index_store
        .search_vector("idx__m", &[0.1, 0.99], 10)
        .await
        .unwrap();
    assert_eq!(hits[0].record.hash, "hb");

    assert!(index_store.delete("idx__m").await.unwrap());
    assert!(!index_store.exists("idx__m").await.unwrap());
    let err = index_store.search_text("idx__m", "rust", 10).await.unwrap_err();
    assert!(matches!(err, Error::IndexNotFound(_)));
}

#[tokio::test]
async fn test_commit_job_fails_cleanly_without_provider() {
    let (_root, config, pool) = setup().await;

    let session = create_session(
        "doc",
        pages(&["some body text that will try to embed"]),
        meta(1),
        chars_strategy(),
    )
    .unwrap();
    store::insert_session(&pool, &session).await.unwrap();

    let job = JobRecord::new(session.session_id.clone(), "test-model", None);
    store::save_job(&pool, &job).await.unwrap();

    let index_store: Arc<dyn IndexStore> = Arc::new(SqliteIndexStore::new(pool.clone()));
    let finished = run_commit_job(pool.clone(), config, index_store, job).await;

    // The embedding provider is disabled, so every batch fails and the job
    // reaches a terminal failed state with bounded error samples.
    assert_eq!(finished.status, JobStatus::Failed);
    assert_eq!(finished.failed, finished.total);
    assert!(!finished.error_samples.is_empty());
    assert!(finished.error_samples.len() <= chunkforge::jobs::MAX_ERROR_SAMPLES);
    assert!(finished.is_terminal());

    let stored = store::load_job(&pool, &finished.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.completed_at.is_some());

    // The session itself is untouched by the failed commit.
    let stored_session = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(stored_session.version, 1);
}

#[tokio::test]
async fn test_commit_job_snapshot_ignores_later_mutations() {
    let (_root, config, pool) = setup().await;

    let session = create_session(
        "doc",
        pages(&["original body text for the snapshot"]),
        meta(1),
        chars_strategy(),
    )
    .unwrap();
    store::insert_session(&pool, &session).await.unwrap();

    // Queue a job, then mutate the session before the job runs.
    let job = JobRecord::new(session.session_id.clone(), "test-model", None);
    store::save_job(&pool, &job).await.unwrap();

    let mut mutated = store::load_session(&pool, &session.session_id).await.unwrap();
    let edited = mutated.current_text.replace("original", "mutated");
    mutated.apply_text_edit(1, &edited).unwrap();
    store::save_session(&pool, &mutated).await.unwrap();

    let index_store: Arc<dyn IndexStore> = Arc::new(SqliteIndexStore::new(pool.clone()));
    let finished = run_commit_job(pool.clone(), config, index_store, job).await;

    // The job loaded its snapshot after the mutation (it reads at start
    // time), so its total reflects the live revision it snapshotted; either
    // way it reports a terminal status and the mutation was never blocked.
    assert!(finished.is_terminal());
    let stored_session = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(stored_session.version, 2);
}

#[tokio::test]
async fn test_ingested_file_round_trips_through_storage() {
    let (root, _config, pool) = setup().await;

    // Write a plain-text "document" with two form-feed pages.
    let file_path: PathBuf = root.path().join("doc.txt");
    std::fs::write(&file_path, "page one text\n\u{0c}page two text").unwrap();

    let bytes = std::fs::read(&file_path).unwrap();
    let (extracted, extract_meta) =
        chunkforge::extract::extract_pages(&bytes, chunkforge::extract::MIME_TEXT).unwrap();
    assert_eq!(extract_meta.page_count, 2);

    let session = create_session("doc.txt", extracted, extract_meta, chars_strategy()).unwrap();
    store::insert_session(&pool, &session).await.unwrap();

    let loaded = store::load_session(&pool, &session.session_id).await.unwrap();
    assert_eq!(loaded.base_pages[0].text, "page one text");
    assert_eq!(loaded.base_pages[1].text, "page two text");
    assert!(loaded.current_text.contains("<<<PAGE:1>>>"));
    assert!(loaded.current_text.contains("<<<PAGE:2>>>"));
}
