//! Document row access.
//!
//! Small query layer over the `documents` table shared by the gateway,
//! the verifier, and the orchestrator.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{Document, PreviewStatus};

pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(Document::from_row))
}

pub async fn list_document_ids(pool: &SqlitePool) -> Result<Vec<String>> {
    let ids = sqlx::query_scalar("SELECT id FROM documents ORDER BY created_at, id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Record where the current version's content is known to live. Recovery
/// and rehydration writes go through here; the checksum is never touched.
pub async fn update_locations(
    pool: &SqlitePool,
    id: &str,
    primary_location: Option<&str>,
    cache_location: Option<&str>,
    file_exists: bool,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE documents SET primary_location = ?, cache_location = ?, file_exists = ?, updated_at = ? WHERE id = ?",
    )
    .bind(primary_location)
    .bind(cache_location)
    .bind(file_exists as i64)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_primary_location(
    pool: &SqlitePool,
    id: &str,
    primary_location: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE documents SET primary_location = ?, updated_at = ? WHERE id = ?")
        .bind(primary_location)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_file_exists(pool: &SqlitePool, id: &str, file_exists: bool) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE documents SET file_exists = ?, updated_at = ? WHERE id = ?")
        .bind(file_exists as i64)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_preview_status(
    pool: &SqlitePool,
    id: &str,
    status: PreviewStatus,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE documents SET preview_status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
