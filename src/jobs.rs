//! Background commit jobs.
//!
//! A commit takes a point-in-time snapshot of a session's chunk spans,
//! embeds their texts, and writes content-addressed records into the
//! per-model index. Jobs are an explicit state machine
//! (`queued → running → succeeded | failed`) persisted through
//! [`crate::store`] and executed on the tokio runtime, decoupled from
//! whatever request started them.
//!
//! The snapshot loaded at job start is authoritative for the whole run: the
//! session may be mutated again while the job is in flight, and the job
//! never re-reads live state. Embedding and index-write failures are
//! per-batch; affected chunks are counted as failed and a bounded sample of
//! errors (first [`MAX_ERROR_SAMPLES`]) is kept on the job, while sibling
//! chunks proceed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{create_provider, embed_texts};
use crate::errors::Result;
use crate::index_router::{ensure_index, resolve_index_name};
use crate::index_store::{IndexRecord, IndexStore};
use crate::models::Session;
use crate::store::{load_session, save_job};

/// Cap on stored error samples per job.
pub const MAX_ERROR_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One recorded failure, attributed to a chunk where possible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub chunk_id: Option<String>,
    pub message: String,
}

/// Persistent state of one commit job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub session_id: String,
    pub embedding_model: String,
    /// Explicit target index; resolved from the model name when absent.
    pub index_name: Option<String>,
    pub status: JobStatus,
    /// 0.0 to 1.0; embedding covers the first half, index writes the second.
    pub progress: f64,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub error_samples: Vec<JobError>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(
        session_id: impl Into<String>,
        embedding_model: impl Into<String>,
        index_name: Option<String>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            embedding_model: embedding_model.into(),
            index_name,
            status: JobStatus::Queued,
            progress: 0.0,
            total: 0,
            succeeded: 0,
            failed: 0,
            error_samples: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded | JobStatus::Failed)
    }

    fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    fn mark_terminal(&mut self, status: JobStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    fn record_error(&mut self, chunk_id: Option<String>, message: impl Into<String>) {
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(JobError {
                chunk_id,
                message: message.into(),
            });
        }
    }
}

/// Execute a commit job to completion and persist its terminal state.
///
/// Never returns an error to the spawner: every failure path ends in a
/// persisted `failed` job record.
pub async fn run_commit_job(
    pool: SqlitePool,
    config: Config,
    index_store: Arc<dyn IndexStore>,
    mut job: JobRecord,
) -> JobRecord {
    tracing::info!(job_id = %job.job_id, session_id = %job.session_id, "starting commit job");

    job.mark_running();
    if let Err(e) = save_job(&pool, &job).await {
        tracing::error!(job_id = %job.job_id, error = %e, "failed to persist running state");
    }

    match execute_commit(&pool, &config, index_store.as_ref(), &mut job).await {
        Ok(()) => {
            let status = if job.failed == 0 {
                JobStatus::Succeeded
            } else {
                JobStatus::Failed
            };
            job.progress = 1.0;
            job.mark_terminal(status);
        }
        Err(e) => {
            tracing::error!(job_id = %job.job_id, error = %e, "commit job failed");
            job.error = Some(e.to_string());
            job.record_error(None, e.to_string());
            job.mark_terminal(JobStatus::Failed);
        }
    }

    if let Err(e) = save_job(&pool, &job).await {
        tracing::error!(job_id = %job.job_id, error = %e, "failed to persist terminal state");
    }

    tracing::info!(
        job_id = %job.job_id,
        status = %job.status,
        succeeded = job.succeeded,
        failed = job.failed,
        "commit job finished"
    );
    job
}

async fn execute_commit(
    pool: &SqlitePool,
    config: &Config,
    index_store: &dyn IndexStore,
    job: &mut JobRecord,
) -> Result<()> {
    // The session loaded here is the job's snapshot; later mutations do not
    // affect this run.
    let session = load_session(pool, &job.session_id).await?;

    if session.chunk_spans.is_empty() {
        job.total = 0;
        return Ok(());
    }

    job.total = session.chunk_spans.len();
    save_job(pool, job).await?;

    let provider = create_provider(&config.embedding)?;
    let dimension = provider.dimension();

    let index_name = match &job.index_name {
        Some(name) => name.clone(),
        None => resolve_index_name(&config.index.base_index, &job.embedding_model),
    };
    ensure_index(index_store, &index_name, dimension).await?;

    let texts: Vec<String> = session
        .chunk_spans
        .iter()
        .map(|chunk| session.chunk_text(chunk).to_string())
        .collect();

    // Phase one: embeddings, batch by batch. A failed batch leaves holes
    // that the write phase skips.
    let batch_size = config.index.bulk_size;
    let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());

    for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
        match embed_texts(provider.as_ref(), &config.embedding, batch).await {
            Ok(batch_vectors) => {
                vectors.extend(batch_vectors.into_iter().map(Some));
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %job.job_id,
                    batch = batch_no,
                    error = %e,
                    "embedding batch failed"
                );
                let offset = batch_no * batch_size;
                for i in 0..batch.len() {
                    let chunk_id = session.chunk_spans[offset + i].chunk_id.clone();
                    job.record_error(Some(chunk_id), e.to_string());
                    vectors.push(None);
                }
                job.failed += batch.len();
            }
        }

        job.progress = 0.5 * (vectors.len() as f64 / texts.len() as f64);
        save_job(pool, job).await?;
    }

    // Phase two: build records for the chunks that embedded and upsert them
    // keyed by content hash.
    let records: Vec<IndexRecord> = session
        .chunk_spans
        .iter()
        .zip(vectors.into_iter())
        .zip(texts.into_iter())
        .filter_map(|((chunk, vector), text)| {
            vector.map(|vector| build_record(&session, chunk, text, vector, job, dimension))
        })
        .collect();

    if records.is_empty() {
        return Ok(());
    }

    let total_records = records.len();
    let mut written = 0usize;
    for batch in records.chunks(batch_size) {
        match index_store.write(&index_name, batch).await {
            Ok(()) => {
                job.succeeded += batch.len();
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "index write batch failed");
                for record in batch {
                    job.record_error(Some(record.chunk_id.clone()), e.to_string());
                }
                job.failed += batch.len();
            }
        }

        written += batch.len();
        job.progress = 0.5 + 0.5 * (written as f64 / total_records as f64);
        save_job(pool, job).await?;
    }

    Ok(())
}

fn build_record(
    session: &Session,
    chunk: &crate::models::ChunkSpan,
    text: String,
    vector: Vec<f32>,
    job: &JobRecord,
    dimension: usize,
) -> IndexRecord {
    IndexRecord {
        hash: chunk.hash.clone(),
        doc_id: session.doc_id.clone(),
        session_id: session.session_id.clone(),
        chunk_id: chunk.chunk_id.clone(),
        page_no: chunk.page_no,
        start: chunk.start,
        end: chunk.end,
        char_len: chunk.char_len,
        text,
        vector,
        metadata: session.metadata_for(&chunk.chunk_id),
        chunk_strategy: session.chunk_strategy.clone(),
        extractor_version: session.extract_meta.extractor_version.clone(),
        embedding_model: job.embedding_model.clone(),
        embedding_dimension: dimension,
        committed_at: Utc::now(),
    }
}
