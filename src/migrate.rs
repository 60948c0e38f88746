use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent, so it is safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Sessions persisted as JSON revisions; version mirrored into its own
    // column for the optimistic write guard.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            session_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            job_id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            status TEXT NOT NULL,
            data TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS indices (
            name TEXT PRIMARY KEY,
            dimension INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_records (
            index_name TEXT NOT NULL,
            hash TEXT NOT NULL,
            chunk_id TEXT NOT NULL,
            doc_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            text TEXT NOT NULL,
            payload TEXT NOT NULL,
            vector BLOB NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (index_name, hash),
            FOREIGN KEY (index_name) REFERENCES indices(name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_doc_id ON sessions(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_session_id ON jobs(session_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_doc_id ON index_records(doc_id)")
        .execute(pool)
        .await?;

    Ok(())
}
