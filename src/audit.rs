//! Append-only audit log.
//!
//! Every state transition in the engine is recorded here before being
//! acted on, so a crash mid-recovery leaves an auditable trail instead of
//! silent inconsistency. Rows are never updated or deleted.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::{EventType, RecoveryEvent};

pub async fn record(
    pool: &SqlitePool,
    document_id: &str,
    event_type: EventType,
    detail: &str,
    actor_id: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO recovery_events (document_id, event_type, detail, actor_id, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(document_id)
    .bind(event_type.as_str())
    .bind(detail)
    .bind(actor_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record an event from a hot path. If the audit store is unavailable the
/// engine degrades with a loud warning rather than dropping the event
/// silently or failing the caller's read.
pub async fn record_or_warn(
    pool: &SqlitePool,
    document_id: &str,
    event_type: EventType,
    detail: &str,
    actor_id: Option<&str>,
) {
    if let Err(e) = record(pool, document_id, event_type, detail, actor_id).await {
        eprintln!(
            "warning: audit log unavailable, event {} for {} not recorded: {}",
            event_type.as_str(),
            document_id,
            e
        );
    }
}

pub async fn events_for(
    pool: &SqlitePool,
    document_id: &str,
    limit: i64,
) -> Result<Vec<RecoveryEvent>> {
    let rows = sqlx::query(
        "SELECT * FROM recovery_events WHERE document_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
    )
    .bind(document_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(RecoveryEvent::from_row).collect())
}

pub async fn count_events(
    pool: &SqlitePool,
    document_id: &str,
    event_type: EventType,
) -> Result<i64> {
    let count = sqlx::query_scalar(
        "SELECT COUNT(*) FROM recovery_events WHERE document_id = ? AND event_type = ?",
    )
    .bind(document_id)
    .bind(event_type.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}
