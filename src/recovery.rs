//! Recovery orchestrator.
//!
//! Detects missing or corrupted content (`scan`), repairs single documents
//! under a single-flight lock (`recover_one`), and drives the persistent
//! retry queue with exponential backoff (`process_retry_queue`).
//!
//! Two strategies, tried in order:
//!   1. tier refetch — a digest-valid copy of the current version still
//!      exists in one tier; copy it to the other.
//!   2. version restore — walk the ledger newest-first for any version
//!      with a digest-valid copy and bring it forward. An older version is
//!      copied forward as a new system-authored version, never by
//!      rewriting the head in place.
//!
//! Every attempt writes `recovery_initiated` before touching storage and
//! exactly one terminal event (`recovery_succeeded` or `recovery_failed`)
//! after, so a crash mid-repair leaves an initiated event with no outcome
//! rather than a silent gap.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::audit;
use crate::config::RecoveryConfig;
use crate::documents;
use crate::error::{EngineError, EngineResult};
use crate::gateway::Gateway;
use crate::models::{EventType, PreviewStatus, RetryQueueItem, RetryStatus};
use crate::tier::Tier;
use crate::versions;

/// Outcome of one successful recovery.
#[derive(Debug, Clone)]
pub struct Recovery {
    /// `"tier_refetch"` or `"version_restore"`.
    pub method: &'static str,
    /// Version recovered to. `tier_refetch` keeps the current version;
    /// `version_restore` of an older version reports the new head.
    pub version: i64,
    /// Set when the repair appended a new version to the ledger.
    pub new_version: Option<i64>,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub scanned: u64,
    pub missing: u64,
    pub mismatched: u64,
    pub enqueued: u64,
}

#[derive(Debug, Default)]
pub struct QueueOutcome {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub rescheduled: u64,
}

/// Queue a document for background recovery. At most one active
/// (`pending` or `in_progress`) row may exist per document; the
/// `idx_retry_active` partial unique index makes the insert atomic, so a
/// duplicate enqueue — including one racing this call — is a no-op and
/// returns `false`.
pub async fn enqueue(pool: &SqlitePool, document_id: &str, reason: &str) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO retry_queue (document_id, attempt_count, next_attempt_at, last_error, status, created_at, updated_at)
        VALUES (?, 0, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(document_id)
    .bind(now)
    .bind(reason)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// `base * 2^attempts`, capped. The shift is clamped so large attempt
/// counts saturate at the cap instead of overflowing.
pub fn backoff_delay(base_secs: i64, cap_secs: i64, attempt_count: i64) -> i64 {
    let shift = attempt_count.clamp(0, 30) as u32;
    base_secs.saturating_mul(1i64 << shift).min(cap_secs)
}

enum DocHealth {
    Healthy,
    Missing,
    Mismatched,
}

/// Sweep every document: confirm a digest-valid copy of the current
/// version exists somewhere, flag the ones that do not, and enqueue them
/// for recovery. Idempotent and restartable; holds no state between runs.
pub async fn scan(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    concurrency: usize,
) -> Result<ScanOutcome> {
    let ids = documents::list_document_ids(pool).await?;
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));

    let mut handles = Vec::with_capacity(ids.len());
    for id in ids {
        let pool = pool.clone();
        let gateway = Arc::clone(gateway);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let health = check_document(&pool, &gateway, &id).await;
            (id, health)
        }));
    }

    let mut outcome = ScanOutcome::default();
    for handle in handles {
        let (id, health) = handle.await?;
        outcome.scanned += 1;
        match health? {
            DocHealth::Healthy => {
                documents::set_file_exists(pool, &id, true).await?;
            }
            DocHealth::Missing => {
                outcome.missing += 1;
                documents::set_file_exists(pool, &id, false).await?;
                audit::record(
                    pool,
                    &id,
                    EventType::MissingDetected,
                    "scan: current version absent from both storage tiers",
                    None,
                )
                .await?;
                if enqueue(pool, &id, "scan: content missing").await? {
                    outcome.enqueued += 1;
                }
            }
            DocHealth::Mismatched => {
                outcome.mismatched += 1;
                audit::record(
                    pool,
                    &id,
                    EventType::ChecksumMismatch,
                    "scan: no stored copy matches the recorded checksum",
                    None,
                )
                .await?;
                if enqueue(pool, &id, "scan: checksum mismatch").await? {
                    outcome.enqueued += 1;
                }
            }
        }
    }
    Ok(outcome)
}

async fn check_document(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    id: &str,
) -> Result<DocHealth> {
    let Some(doc) = documents::get_document(pool, id).await? else {
        // Deleted between listing and checking.
        return Ok(DocHealth::Healthy);
    };
    let key = doc.current_key();

    if gateway.valid_copy(&key, &doc.checksum).await?.is_some() {
        return Ok(DocHealth::Healthy);
    }

    let on_primary = gateway.exists_in(Tier::Primary, &key).await.unwrap_or(false);
    let on_cache = gateway.exists_in(Tier::Cache, &key).await.unwrap_or(false);
    if on_primary || on_cache {
        Ok(DocHealth::Mismatched)
    } else {
        Ok(DocHealth::Missing)
    }
}

/// Recover one document under the single-flight lock. A concurrent
/// attempt for the same document gets `AlreadyInFlight` immediately
/// instead of queueing behind the lock.
pub async fn recover_one(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
) -> EngineResult<Recovery> {
    let Some(_guard) = gateway.locks().try_acquire(document_id) else {
        return Err(EngineError::AlreadyInFlight);
    };

    // Read the row only after the lock is held, so a version commit that
    // finished just before cannot leave a stale head/checksum here.
    let doc = documents::get_document(pool, document_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    audit::record(
        pool,
        document_id,
        EventType::RecoveryInitiated,
        &format!("recovery started for version {}", doc.current_version),
        None,
    )
    .await
    .map_err(EngineError::Other)?;

    let key = doc.current_key();

    // Strategy 1: a digest-valid copy of the current version survives in
    // one tier; mirror it back to the other.
    if let Some((source, bytes)) = gateway.valid_copy(&key, &doc.checksum).await? {
        repair_current(pool, gateway, document_id, &key, &bytes, source).await?;
        if doc.preview_status == PreviewStatus::Placeholder {
            documents::set_preview_status(pool, document_id, PreviewStatus::Original).await?;
            audit::record_or_warn(
                pool,
                document_id,
                EventType::PreviewStatusChanged,
                "placeholder -> original: current content recovered",
                None,
            )
            .await;
        }
        audit::record(
            pool,
            document_id,
            EventType::RecoverySucceeded,
            &format!(
                "tier refetch: copied version {} from {} tier",
                doc.current_version,
                source.as_str()
            ),
            None,
        )
        .await
        .map_err(EngineError::Other)?;
        return Ok(Recovery {
            method: "tier_refetch",
            version: doc.current_version,
            new_version: None,
        });
    }

    // Strategy 2: walk the ledger newest-first for any version that still
    // has a valid copy.
    let ledger = versions::history(pool, document_id)
        .await
        .map_err(EngineError::Other)?;
    for version in &ledger {
        if version.version_number == doc.current_version {
            continue; // strategy 1 already ruled the head out
        }
        let Some((source, bytes)) = gateway
            .valid_copy(&version.storage_key, &version.checksum)
            .await?
        else {
            continue;
        };

        let notes = format!("recovered from version {}", version.version_number);
        let outcome = versions::create_version_locked(
            pool,
            gateway,
            document_id,
            &bytes,
            None,
            Some(&notes),
        )
        .await?;

        documents::set_preview_status(pool, document_id, PreviewStatus::Regenerated).await?;
        audit::record_or_warn(
            pool,
            document_id,
            EventType::PreviewStatusChanged,
            "preview regenerated: content restored from an earlier version",
            None,
        )
        .await;
        audit::record(
            pool,
            document_id,
            EventType::RecoverySucceeded,
            &format!(
                "version restore: version {} (from {} tier) copied forward as version {}",
                version.version_number,
                source.as_str(),
                outcome.version
            ),
            None,
        )
        .await
        .map_err(EngineError::Other)?;
        return Ok(Recovery {
            method: "version_restore",
            version: version.version_number,
            new_version: Some(outcome.version),
        });
    }

    // No valid copy of any version anywhere. Terminal until a tier comes
    // back or an operator intervenes.
    documents::set_file_exists(pool, document_id, false).await?;
    if doc.preview_status != PreviewStatus::Placeholder {
        documents::set_preview_status(pool, document_id, PreviewStatus::Placeholder).await?;
        audit::record_or_warn(
            pool,
            document_id,
            EventType::PreviewStatusChanged,
            "preview placeholder: no valid copy of any version found",
            None,
        )
        .await;
    }
    audit::record(
        pool,
        document_id,
        EventType::RecoveryFailed,
        "no digest-valid copy of any version in either tier",
        None,
    )
    .await
    .map_err(EngineError::Other)?;
    Err(EngineError::NotFound)
}

async fn repair_current(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
    key: &str,
    bytes: &[u8],
    source: Tier,
) -> EngineResult<()> {
    // Overwrite the other tier unconditionally; it is either absent or
    // holds bytes that failed the digest check.
    let target = source.other();
    let mut target_ok = false;
    match gateway.put_in(target, key, bytes).await {
        Ok(()) => target_ok = true,
        Err(e) => eprintln!(
            "warning: recovery could not repair {} copy of {}: {}",
            target.as_str(),
            document_id,
            e
        ),
    }
    let (primary_ok, cache_ok) = match source {
        Tier::Primary => (true, target_ok),
        Tier::Cache => (target_ok, true),
    };

    documents::update_locations(
        pool,
        document_id,
        primary_ok.then(|| key.to_string()).as_deref(),
        cache_ok.then(|| key.to_string()).as_deref(),
        true,
    )
    .await?;
    Ok(())
}

/// Recover several documents with bounded parallelism. Input ids are
/// deduplicated; results come back in input order.
pub async fn recover_batch(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    ids: &[String],
    concurrency: usize,
) -> Result<Vec<(String, EngineResult<Recovery>)>> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(unique.len());
    for id in unique {
        let pool = pool.clone();
        let gateway = Arc::clone(gateway);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let result = recover_one(&pool, &gateway, &id).await;
            (id, result)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await?);
    }
    Ok(results)
}

/// Run every due retry-queue item once.
///
/// Items past `max_attempts` are abandoned with a `recovery_failed`
/// event. `AlreadyInFlight` reschedules without consuming an attempt:
/// another worker owns the document and the queue should not punish the
/// item for that. Each attempt is bounded by `attempt_timeout_secs`.
pub async fn process_retry_queue(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    config: &RecoveryConfig,
) -> Result<QueueOutcome> {
    let now = chrono::Utc::now().timestamp();

    // A row still in_progress past the attempt timeout belongs to a sweep
    // that died mid-attempt; put it back in rotation.
    sqlx::query(
        "UPDATE retry_queue SET status = 'pending', updated_at = ? WHERE status = 'in_progress' AND updated_at <= ?",
    )
    .bind(now)
    .bind(now - config.attempt_timeout_secs as i64)
    .execute(pool)
    .await?;

    let rows = sqlx::query(
        "SELECT * FROM retry_queue WHERE status = 'pending' AND next_attempt_at <= ? ORDER BY next_attempt_at, id",
    )
    .bind(now)
    .fetch_all(pool)
    .await?;
    let due: Vec<RetryQueueItem> = rows.iter().map(RetryQueueItem::from_row).collect();

    let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let attempt_timeout = Duration::from_secs(config.attempt_timeout_secs);

    let mut handles = Vec::with_capacity(due.len());
    for item in due {
        set_status(pool, item.id, RetryStatus::InProgress, None).await?;

        let pool = pool.clone();
        let gateway = Arc::clone(gateway);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let result =
                tokio::time::timeout(attempt_timeout, recover_one(&pool, &gateway, &item.document_id))
                    .await;
            (item, result)
        }));
    }

    let mut outcome = QueueOutcome::default();
    for handle in handles {
        let (item, result) = handle.await?;
        outcome.processed += 1;

        match result {
            Ok(Ok(_)) => {
                outcome.succeeded += 1;
                set_status(pool, item.id, RetryStatus::Succeeded, None).await?;
            }
            Ok(Err(EngineError::AlreadyInFlight)) => {
                // Not a failure of the item itself: retry soon, same
                // attempt count.
                outcome.rescheduled += 1;
                reschedule(pool, &item, item.attempt_count, config, "recovery already in flight")
                    .await?;
            }
            Ok(Err(e)) => {
                record_failure(pool, &item, &e.to_string(), config, &mut outcome).await?;
            }
            Err(_elapsed) => {
                record_failure(pool, &item, "recovery attempt timed out", config, &mut outcome)
                    .await?;
            }
        }
    }
    Ok(outcome)
}

async fn record_failure(
    pool: &SqlitePool,
    item: &RetryQueueItem,
    error: &str,
    config: &RecoveryConfig,
    outcome: &mut QueueOutcome,
) -> Result<()> {
    let attempts = item.attempt_count + 1;
    if attempts >= config.max_attempts as i64 {
        outcome.abandoned += 1;
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE retry_queue SET status = 'abandoned', attempt_count = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(attempts)
        .bind(error)
        .bind(now)
        .bind(item.id)
        .execute(pool)
        .await?;
        audit::record(
            pool,
            &item.document_id,
            EventType::RecoveryFailed,
            &format!("retry queue abandoned after {} attempts: {}", attempts, error),
            None,
        )
        .await?;
    } else {
        outcome.failed += 1;
        reschedule(pool, item, attempts, config, error).await?;
    }
    Ok(())
}

async fn reschedule(
    pool: &SqlitePool,
    item: &RetryQueueItem,
    attempts: i64,
    config: &RecoveryConfig,
    error: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let next = now + backoff_delay(config.backoff_base_secs, config.backoff_cap_secs, attempts);
    sqlx::query(
        "UPDATE retry_queue SET status = 'pending', attempt_count = ?, next_attempt_at = ?, last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(attempts)
    .bind(next)
    .bind(error)
    .bind(now)
    .bind(item.id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn set_status(
    pool: &SqlitePool,
    item_id: i64,
    status: RetryStatus,
    last_error: Option<&str>,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE retry_queue SET status = ?, last_error = COALESCE(?, last_error), updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(last_error)
        .bind(now)
        .bind(item_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Whether the most recent retry-queue row for a document ended in
/// abandonment. Reads of content that is absent from both tiers surface
/// this as `Abandoned` instead of a plain `NotFound`, so operators can
/// tell exhausted retries apart from a transient gap.
pub async fn last_attempt_abandoned(pool: &SqlitePool, document_id: &str) -> Result<bool> {
    let status: Option<String> = sqlx::query_scalar(
        "SELECT status FROM retry_queue WHERE document_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await?;
    Ok(status.as_deref() == Some("abandoned"))
}

/// All queue rows for a document, newest first.
pub async fn queue_items_for(
    pool: &SqlitePool,
    document_id: &str,
) -> Result<Vec<RetryQueueItem>> {
    let rows = sqlx::query(
        "SELECT * FROM retry_queue WHERE document_id = ? ORDER BY created_at DESC, id DESC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(RetryQueueItem::from_row).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DbConfig, GatewayConfig, PrimaryTierConfig, RecoveryConfig, ServerConfig,
        StorageConfig,
    };
    use crate::models::storage_key;
    use crate::{db, migrate, versions};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, SqlitePool, Arc<Gateway>) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let config = Config {
            db: DbConfig {
                path: root.join("data/meta.sqlite"),
            },
            storage: StorageConfig {
                cache_dir: root.join("cache"),
                primary: PrimaryTierConfig {
                    kind: "filesystem".to_string(),
                    root: Some(root.join("primary")),
                    bucket: None,
                    prefix: String::new(),
                    region: "us-east-1".to_string(),
                    endpoint_url: None,
                },
            },
            gateway: GatewayConfig::default(),
            recovery: RecoveryConfig::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        };
        migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        let gateway = Gateway::from_config(&config).unwrap();
        (tmp, pool, gateway)
    }

    fn corrupt(root: &std::path::Path, tier: &str, key: &str) {
        std::fs::write(root.join(tier).join(key), b"tampered bytes").unwrap();
    }

    fn remove(root: &std::path::Path, tier: &str, key: &str) {
        std::fs::remove_file(root.join(tier).join(key)).unwrap();
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        assert_eq!(backoff_delay(60, 3600, 0), 60);
        assert_eq!(backoff_delay(60, 3600, 1), 120);
        assert_eq!(backoff_delay(60, 3600, 2), 240);
        assert_eq!(backoff_delay(60, 3600, 6), 3600);
        assert_eq!(backoff_delay(60, 3600, 100), 3600);
    }

    #[tokio::test]
    async fn test_enqueue_dedupes_active_items() {
        let (_tmp, pool, _gateway) = setup().await;
        assert!(enqueue(&pool, "doc-1", "first").await.unwrap());
        assert!(!enqueue(&pool, "doc-1", "second").await.unwrap());

        sqlx::query("UPDATE retry_queue SET status = 'succeeded' WHERE document_id = 'doc-1'")
            .execute(&pool)
            .await
            .unwrap();
        assert!(enqueue(&pool, "doc-1", "third").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_enqueues_insert_one_row() {
        let (_tmp, pool, _gateway) = setup().await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                enqueue(&pool, "doc-race", "racing enqueue").await.unwrap()
            }));
        }
        let mut inserted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM retry_queue WHERE document_id = 'doc-race' AND status IN ('pending', 'in_progress')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn test_recover_one_is_single_flight() {
        let (_tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();

        let _held = gateway.locks().try_acquire(&c.document_id).unwrap();
        let err = recover_one(&pool, &gateway, &c.document_id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyInFlight));

        // The losing attempt backs off before reading or logging anything.
        let initiated =
            audit::count_events(&pool, &c.document_id, EventType::RecoveryInitiated).await.unwrap();
        assert_eq!(initiated, 0);
    }

    #[tokio::test]
    async fn test_tier_refetch_repairs_missing_primary() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        remove(tmp.path(), "primary", &key);

        let recovery = recover_one(&pool, &gateway, &c.document_id).await.unwrap();
        assert_eq!(recovery.method, "tier_refetch");
        assert_eq!(recovery.version, 1);
        assert!(recovery.new_version.is_none());
        assert!(tmp.path().join("primary").join(&key).exists());

        let initiated =
            audit::count_events(&pool, &c.document_id, EventType::RecoveryInitiated).await.unwrap();
        let succeeded =
            audit::count_events(&pool, &c.document_id, EventType::RecoverySucceeded).await.unwrap();
        assert_eq!(initiated, 1);
        assert_eq!(succeeded, 1);
    }

    #[tokio::test]
    async fn test_version_restore_copies_older_version_forward() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"first", None, None)
            .await
            .unwrap();
        versions::create_version(&pool, &gateway, &c.document_id, b"second", None, None)
            .await
            .unwrap();

        // Current version corrupted in both tiers; version 1 intact.
        let head_key = storage_key(&c.document_id, 2);
        corrupt(tmp.path(), "primary", &head_key);
        corrupt(tmp.path(), "cache", &head_key);

        let recovery = recover_one(&pool, &gateway, &c.document_id).await.unwrap();
        assert_eq!(recovery.method, "version_restore");
        assert_eq!(recovery.version, 1);
        assert_eq!(recovery.new_version, Some(3));

        let doc = documents::get_document(&pool, &c.document_id).await.unwrap().unwrap();
        assert_eq!(doc.current_version, 3);
        assert_eq!(doc.checksum, c.checksum);
        assert_eq!(doc.preview_status, PreviewStatus::Regenerated);

        let ledger = versions::history(&pool, &c.document_id).await.unwrap();
        assert_eq!(ledger.len(), 3);
        assert!(ledger[0].created_by.is_none());
    }

    #[tokio::test]
    async fn test_unrecoverable_document_fails_closed() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"only", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        corrupt(tmp.path(), "primary", &key);
        remove(tmp.path(), "cache", &key);

        let err = recover_one(&pool, &gateway, &c.document_id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound));

        let doc = documents::get_document(&pool, &c.document_id).await.unwrap().unwrap();
        assert!(!doc.file_exists);
        assert_eq!(doc.preview_status, PreviewStatus::Placeholder);
        let failed =
            audit::count_events(&pool, &c.document_id, EventType::RecoveryFailed).await.unwrap();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn test_scan_flags_missing_and_mismatched() {
        let (tmp, pool, gateway) = setup().await;
        let healthy = versions::commit_new_document(&pool, &gateway, "a", b"fine", None, None)
            .await
            .unwrap();
        let missing = versions::commit_new_document(&pool, &gateway, "b", b"gone", None, None)
            .await
            .unwrap();
        let corrupted = versions::commit_new_document(&pool, &gateway, "c", b"bad", None, None)
            .await
            .unwrap();

        let missing_key = storage_key(&missing.document_id, 1);
        remove(tmp.path(), "primary", &missing_key);
        remove(tmp.path(), "cache", &missing_key);
        let corrupt_key = storage_key(&corrupted.document_id, 1);
        corrupt(tmp.path(), "primary", &corrupt_key);
        corrupt(tmp.path(), "cache", &corrupt_key);

        let outcome = scan(&pool, &gateway, 4).await.unwrap();
        assert_eq!(outcome.scanned, 3);
        assert_eq!(outcome.missing, 1);
        assert_eq!(outcome.mismatched, 1);
        assert_eq!(outcome.enqueued, 2);

        let doc = documents::get_document(&pool, &missing.document_id).await.unwrap().unwrap();
        assert!(!doc.file_exists);
        let doc = documents::get_document(&pool, &healthy.document_id).await.unwrap().unwrap();
        assert!(doc.file_exists);

        // Second scan finds the same problems but enqueues nothing new.
        let outcome = scan(&pool, &gateway, 4).await.unwrap();
        assert_eq!(outcome.enqueued, 0);
    }

    #[tokio::test]
    async fn test_retry_queue_recovers_then_succeeds() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        remove(tmp.path(), "primary", &key);

        enqueue(&pool, &c.document_id, "test").await.unwrap();
        let config = RecoveryConfig::default();
        let outcome = process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.succeeded, 1);

        let items = queue_items_for(&pool, &c.document_id).await.unwrap();
        assert_eq!(items[0].status, RetryStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_retry_queue_abandons_at_max_attempts() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        remove(tmp.path(), "primary", &key);
        remove(tmp.path(), "cache", &key);

        enqueue(&pool, &c.document_id, "test").await.unwrap();
        let config = RecoveryConfig {
            max_attempts: 1,
            ..RecoveryConfig::default()
        };
        let outcome = process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.abandoned, 1);
        assert_eq!(outcome.succeeded, 0);

        let items = queue_items_for(&pool, &c.document_id).await.unwrap();
        assert_eq!(items[0].status, RetryStatus::Abandoned);
        assert_eq!(items[0].attempt_count, 1);

        // Nothing due anymore.
        let outcome = process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert_eq!(outcome.processed, 0);
    }

    #[tokio::test]
    async fn test_stale_in_progress_row_returns_to_pending() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        remove(tmp.path(), "primary", &key);
        enqueue(&pool, &c.document_id, "test").await.unwrap();

        // Simulate a sweep that died mid-attempt: the row is stuck
        // in_progress with an update timestamp past the attempt timeout.
        let config = RecoveryConfig::default();
        let stale = chrono::Utc::now().timestamp() - config.attempt_timeout_secs as i64 - 60;
        sqlx::query("UPDATE retry_queue SET status = 'in_progress', updated_at = ?")
            .bind(stale)
            .execute(&pool)
            .await
            .unwrap();

        let outcome = process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert_eq!(outcome.processed, 1);
        assert_eq!(outcome.succeeded, 1);

        let items = queue_items_for(&pool, &c.document_id).await.unwrap();
        assert_eq!(items[0].status, RetryStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_fresh_in_progress_row_is_left_alone() {
        let (_tmp, pool, gateway) = setup().await;
        enqueue(&pool, "doc-1", "test").await.unwrap();
        sqlx::query("UPDATE retry_queue SET status = 'in_progress'")
            .execute(&pool)
            .await
            .unwrap();

        let config = RecoveryConfig::default();
        let outcome = process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert_eq!(outcome.processed, 0);

        let items = queue_items_for(&pool, "doc-1").await.unwrap();
        assert_eq!(items[0].status, RetryStatus::InProgress);
    }

    #[tokio::test]
    async fn test_reads_surface_abandoned_recovery() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        remove(tmp.path(), "primary", &key);
        remove(tmp.path(), "cache", &key);

        enqueue(&pool, &c.document_id, "test").await.unwrap();
        let config = RecoveryConfig {
            max_attempts: 1,
            ..RecoveryConfig::default()
        };
        process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert!(last_attempt_abandoned(&pool, &c.document_id).await.unwrap());

        let doc = documents::get_document(&pool, &c.document_id).await.unwrap().unwrap();
        let err = gateway.fetch(&pool, &doc).await.unwrap_err();
        assert!(matches!(err, EngineError::Abandoned));
    }

    #[tokio::test]
    async fn test_in_flight_reschedule_keeps_attempt_count() {
        let (tmp, pool, gateway) = setup().await;
        let c = versions::commit_new_document(&pool, &gateway, "doc", b"body", None, None)
            .await
            .unwrap();
        let key = storage_key(&c.document_id, 1);
        remove(tmp.path(), "primary", &key);

        enqueue(&pool, &c.document_id, "test").await.unwrap();
        let _held = gateway.locks().try_acquire(&c.document_id).unwrap();

        let config = RecoveryConfig::default();
        let outcome = process_retry_queue(&pool, &gateway, &config).await.unwrap();
        assert_eq!(outcome.rescheduled, 1);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.abandoned, 0);

        let items = queue_items_for(&pool, &c.document_id).await.unwrap();
        assert_eq!(items[0].status, RetryStatus::Pending);
        assert_eq!(items[0].attempt_count, 0);
    }
}
