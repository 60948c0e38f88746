//! Session and job persistence.
//!
//! Whole aggregates are stored as JSON rows in SQLite; the session version
//! is mirrored into its own column so the save can enforce the optimistic
//! write guard at the persistence boundary: a revision only lands if it is
//! strictly newer than what is stored. Two racing writers therefore resolve
//! to "last validated write wins", and the loser re-reads and retries.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::errors::{Error, Result};
use crate::jobs::JobRecord;
use crate::models::Session;

/// Insert a brand-new session. Fails if the id already exists.
pub async fn insert_session(pool: &SqlitePool, session: &Session) -> Result<()> {
    let data = serde_json::to_string(session)?;
    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, doc_id, version, data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&session.session_id)
    .bind(&session.doc_id)
    .bind(session.version as i64)
    .bind(&data)
    .bind(session.created_at.timestamp())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Persist a mutated session revision.
///
/// The update only applies when the stored version is exactly one behind the
/// revision being written; anything else means another writer got there
/// first and the caller must re-read and retry.
pub async fn save_session(pool: &SqlitePool, session: &Session) -> Result<()> {
    let data = serde_json::to_string(session)?;
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET version = ?, data = ?, updated_at = ?
        WHERE session_id = ? AND version = ?
        "#,
    )
    .bind(session.version as i64)
    .bind(&data)
    .bind(Utc::now().timestamp())
    .bind(&session.session_id)
    .bind(session.version as i64 - 1)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM sessions WHERE session_id = ?")
                .bind(&session.session_id)
                .fetch_optional(pool)
                .await?;
        return match stored {
            None => Err(Error::SessionNotFound(session.session_id.clone())),
            Some(actual) => Err(Error::VersionConflict {
                expected: session.version - 1,
                actual: actual as u64,
            }),
        };
    }
    Ok(())
}

/// Persist non-versioned session changes (chunk metadata edits).
///
/// Still guarded against the stored version: a metadata edit computed on a
/// superseded revision is rejected rather than clobbering the newer one.
pub async fn save_session_unversioned(pool: &SqlitePool, session: &Session) -> Result<()> {
    let data = serde_json::to_string(session)?;
    let result = sqlx::query(
        "UPDATE sessions SET data = ?, updated_at = ? WHERE session_id = ? AND version = ?",
    )
    .bind(&data)
    .bind(Utc::now().timestamp())
    .bind(&session.session_id)
    .bind(session.version as i64)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let stored: Option<i64> =
            sqlx::query_scalar("SELECT version FROM sessions WHERE session_id = ?")
                .bind(&session.session_id)
                .fetch_optional(pool)
                .await?;
        return match stored {
            None => Err(Error::SessionNotFound(session.session_id.clone())),
            Some(actual) => Err(Error::VersionConflict {
                expected: session.version,
                actual: actual as u64,
            }),
        };
    }
    Ok(())
}

pub async fn load_session(pool: &SqlitePool, session_id: &str) -> Result<Session> {
    let data: Option<String> =
        sqlx::query_scalar("SELECT data FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(pool)
            .await?;

    match data {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Err(Error::SessionNotFound(session_id.to_string())),
    }
}

/// Session ids with doc id and version, newest first.
pub async fn list_sessions(pool: &SqlitePool) -> Result<Vec<(String, String, u64)>> {
    let rows: Vec<(String, String, i64)> = sqlx::query_as(
        "SELECT session_id, doc_id, version FROM sessions ORDER BY created_at DESC, session_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, doc, v)| (id, doc, v as u64))
        .collect())
}

pub async fn delete_session(pool: &SqlitePool, session_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Upsert a job record. Job writes are single-owner, so no version guard.
pub async fn save_job(pool: &SqlitePool, job: &JobRecord) -> Result<()> {
    let data = serde_json::to_string(job)?;
    sqlx::query(
        r#"
        INSERT INTO jobs (job_id, session_id, status, data, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(job_id) DO UPDATE SET
            status = excluded.status,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&job.job_id)
    .bind(&job.session_id)
    .bind(job.status.to_string())
    .bind(&data)
    .bind(job.created_at.timestamp())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_job(pool: &SqlitePool, job_id: &str) -> Result<JobRecord> {
    let data: Option<String> = sqlx::query_scalar("SELECT data FROM jobs WHERE job_id = ?")
        .bind(job_id)
        .fetch_optional(pool)
        .await?;

    match data {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Err(Error::JobNotFound(job_id.to_string())),
    }
}
