use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Canonical document records
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            display_name TEXT NOT NULL,
            current_version INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            primary_location TEXT,
            cache_location TEXT,
            preview_status TEXT NOT NULL DEFAULT 'original',
            file_exists INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Immutable version ledger
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            document_id TEXT NOT NULL,
            version_number INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            storage_key TEXT NOT NULL,
            created_by TEXT,
            notes TEXT,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (document_id, version_number),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Append-only recovery event log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recovery_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            detail TEXT NOT NULL DEFAULT '',
            actor_id TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Retry work queue
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS retry_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            next_attempt_at INTEGER NOT NULL,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_document ON document_versions(document_id, version_number DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_events_document ON recovery_events(document_id, created_at DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_type ON recovery_events(event_type)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_retry_due ON retry_queue(status, next_attempt_at)",
    )
    .execute(&pool)
    .await?;
    // At most one active queue row per document, enforced in the schema so
    // concurrent enqueuers cannot race past an application-level check.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_retry_active ON retry_queue(document_id) \
         WHERE status IN ('pending', 'in_progress')",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_retry_document ON retry_queue(document_id)")
        .execute(&pool)
        .await?;

    pool.close().await;
    Ok(())
}
