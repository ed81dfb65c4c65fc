//! Version history manager.
//!
//! An immutable, append-only ledger per document. Version numbers are
//! contiguous and strictly increasing from 1; numbering happens under the
//! per-document lock so concurrent writers serialize instead of racing to
//! duplicate numbers. Restore is copy-forward: old content becomes a new
//! version, history is never rewritten.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::checksum::compute_checksum;
use crate::documents;
use crate::error::{EngineError, EngineResult};
use crate::gateway::Gateway;
use crate::models::{storage_key, DocumentVersion};

pub struct CommitOutcome {
    pub document_id: String,
    pub version: i64,
    pub checksum: String,
    pub stored_primary: bool,
    pub stored_cache: bool,
}

pub struct PruneOutcome {
    pub deleted: u64,
    pub kept: u64,
}

/// Full ledger, newest first.
pub async fn history(pool: &SqlitePool, document_id: &str) -> Result<Vec<DocumentVersion>> {
    let rows = sqlx::query(
        "SELECT * FROM document_versions WHERE document_id = ? ORDER BY version_number DESC",
    )
    .bind(document_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(DocumentVersion::from_row).collect())
}

pub async fn get_version(
    pool: &SqlitePool,
    document_id: &str,
    version_number: i64,
) -> Result<Option<DocumentVersion>> {
    let row = sqlx::query(
        "SELECT * FROM document_versions WHERE document_id = ? AND version_number = ?",
    )
    .bind(document_id)
    .bind(version_number)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(DocumentVersion::from_row))
}

/// Commit a brand-new document: version 1, checksum computed, content
/// stored in both tiers where possible.
pub async fn commit_new_document(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    display_name: &str,
    bytes: &[u8],
    created_by: Option<&str>,
    notes: Option<&str>,
) -> EngineResult<CommitOutcome> {
    let document_id = Uuid::new_v4().to_string();
    let checksum = compute_checksum(bytes);
    let key = storage_key(&document_id, 1);
    let now = chrono::Utc::now().timestamp();

    let stored = gateway.store_new_object(pool, &document_id, &key, bytes).await?;

    // The version is committed once the checksum lands in the metadata
    // store, even while the primary write may still be retrying.
    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO documents
            (id, display_name, current_version, checksum, primary_location, cache_location,
             preview_status, file_exists, created_at, updated_at)
        VALUES (?, ?, 1, ?, ?, ?, 'original', 1, ?, ?)
        "#,
    )
    .bind(&document_id)
    .bind(display_name)
    .bind(&checksum)
    .bind(&stored.primary)
    .bind(&stored.cache)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    insert_version_row(&mut tx, &document_id, 1, &checksum, &key, created_by, notes, now).await?;
    tx.commit().await?;

    Ok(CommitOutcome {
        document_id,
        version: 1,
        checksum,
        stored_primary: stored.primary.is_some(),
        stored_cache: stored.cache.is_some(),
    })
}

/// Append a new version to an existing document. Serializes on the
/// per-document lock so numbers stay gapless under concurrent writers.
pub async fn create_version(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
    bytes: &[u8],
    created_by: Option<&str>,
    notes: Option<&str>,
) -> EngineResult<CommitOutcome> {
    let _guard = gateway.locks().acquire(document_id).await;
    create_version_locked(pool, gateway, document_id, bytes, created_by, notes).await
}

/// Version append for callers that already hold the document lock
/// (recovery's copy-forward restore).
pub(crate) async fn create_version_locked(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
    bytes: &[u8],
    created_by: Option<&str>,
    notes: Option<&str>,
) -> EngineResult<CommitOutcome> {
    let doc = documents::get_document(pool, document_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    let next = doc.current_version + 1;
    let checksum = compute_checksum(bytes);
    let key = storage_key(document_id, next);
    let now = chrono::Utc::now().timestamp();

    let stored = gateway.store_new_object(pool, document_id, &key, bytes).await?;

    let mut tx = pool.begin().await?;
    insert_version_row(&mut tx, document_id, next, &checksum, &key, created_by, notes, now).await?;
    sqlx::query(
        r#"
        UPDATE documents
        SET current_version = ?, checksum = ?, primary_location = ?, cache_location = ?,
            file_exists = 1, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(next)
    .bind(&checksum)
    .bind(&stored.primary)
    .bind(&stored.cache)
    .bind(now)
    .bind(document_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(CommitOutcome {
        document_id: document_id.to_string(),
        version: next,
        checksum,
        stored_primary: stored.primary.is_some(),
        stored_cache: stored.cache.is_some(),
    })
}

#[allow(clippy::too_many_arguments)]
async fn insert_version_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    document_id: &str,
    version_number: i64,
    checksum: &str,
    key: &str,
    created_by: Option<&str>,
    notes: Option<&str>,
    now: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO document_versions
            (document_id, version_number, checksum, storage_key, created_by, notes, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(document_id)
    .bind(version_number)
    .bind(checksum)
    .bind(key)
    .bind(created_by)
    .bind(notes)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Restore a document to an earlier version by copying that version's
/// content forward as a new version. Refuses to restore corrupted
/// history: the fetched bytes must match the version's recorded checksum.
pub async fn restore(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
    target_version: i64,
    actor_id: Option<&str>,
    notes: Option<&str>,
) -> EngineResult<i64> {
    let version = get_version(pool, document_id, target_version)
        .await?
        .ok_or(EngineError::NotFound)?;

    let (_tier, bytes) = gateway
        .fetch_raw(&version.storage_key)
        .await?
        .ok_or(EngineError::NotFound)?;

    let digest = compute_checksum(&bytes);
    if digest != version.checksum {
        return Err(EngineError::ChecksumMismatch {
            expected: version.checksum,
            actual: digest,
        });
    }

    let default_notes = format!("restored from version {}", target_version);
    let outcome = create_version(
        pool,
        gateway,
        document_id,
        &bytes,
        actor_id,
        Some(notes.unwrap_or(&default_notes)),
    )
    .await?;

    Ok(outcome.version)
}

/// Delete storage objects and ledger rows older than the `keep_latest_n`
/// most recent versions. The version currently referenced by the document
/// head is always kept, whatever `keep_latest_n` says.
pub async fn prune(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
    keep_latest_n: i64,
) -> EngineResult<PruneOutcome> {
    let _guard = gateway.locks().acquire(document_id).await;
    let doc = documents::get_document(pool, document_id)
        .await?
        .ok_or(EngineError::NotFound)?;

    let versions = history(pool, document_id).await?;
    let keep_n = keep_latest_n.max(1) as usize;

    let mut deleted = 0u64;
    let mut kept = 0u64;

    for (idx, version) in versions.iter().enumerate() {
        let keep = idx < keep_n || version.version_number == doc.current_version;
        if keep {
            kept += 1;
            continue;
        }

        // Storage first; a failed object delete keeps the ledger row so
        // nothing ever points at nothing.
        if let Err(e) = gateway.delete_everywhere(&version.storage_key).await {
            eprintln!(
                "warning: prune could not delete object '{}': {}",
                version.storage_key, e
            );
            kept += 1;
            continue;
        }

        sqlx::query(
            "DELETE FROM document_versions WHERE document_id = ? AND version_number = ?",
        )
        .bind(document_id)
        .bind(version.version_number)
        .execute(pool)
        .await?;
        deleted += 1;
    }

    Ok(PruneOutcome { deleted, kept })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        Config, DbConfig, GatewayConfig, PrimaryTierConfig, RecoveryConfig, ServerConfig,
        StorageConfig,
    };
    use crate::{db, migrate};
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

    #[tokio::test]
    async fn test_commit_then_history() {
        let (_tmp, pool, gateway) = setup().await;
        let c = commit_new_document(&pool, &gateway, "invoice.pdf", b"v1 bytes", None, None)
            .await
            .unwrap();
        assert_eq!(c.version, 1);
        assert!(c.stored_primary && c.stored_cache);

        create_version(&pool, &gateway, &c.document_id, b"v2 bytes", Some("user-1"), None)
            .await
            .unwrap();

        let h = history(&pool, &c.document_id).await.unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].version_number, 2);
        assert_eq!(h[1].version_number, 1);
        assert_eq!(h[0].created_by.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_concurrent_writers_stay_gapless() {
        let (_tmp, pool, gateway) = setup().await;
        let c = commit_new_document(&pool, &gateway, "doc", b"base", None, None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            let gateway = Arc::clone(&gateway);
            let id = c.document_id.clone();
            handles.push(tokio::spawn(async move {
                create_version(&pool, &gateway, &id, format!("body {}", i).as_bytes(), None, None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let h = history(&pool, &c.document_id).await.unwrap();
        assert_eq!(h.len(), 9);
        let numbers: Vec<i64> = h.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, (1..=9).rev().collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_restore_copies_forward() {
        let (_tmp, pool, gateway) = setup().await;
        let c = commit_new_document(&pool, &gateway, "doc", b"first", None, None)
            .await
            .unwrap();
        create_version(&pool, &gateway, &c.document_id, b"second", None, None)
            .await
            .unwrap();

        // Restoring twice appends two versions with version 1's checksum.
        let v3 = restore(&pool, &gateway, &c.document_id, 1, Some("user-9"), None)
            .await
            .unwrap();
        let v4 = restore(&pool, &gateway, &c.document_id, 1, Some("user-9"), None)
            .await
            .unwrap();
        assert_eq!(v3, 3);
        assert_eq!(v4, 4);

        let h = history(&pool, &c.document_id).await.unwrap();
        assert_eq!(h.len(), 4);
        assert_eq!(h[0].checksum, h[3].checksum);
        assert_eq!(h[1].checksum, h[3].checksum);
    }

    #[tokio::test]
    async fn test_restore_refuses_corrupted_history() {
        let (tmp, pool, gateway) = setup().await;
        let c = commit_new_document(&pool, &gateway, "doc", b"first", None, None)
            .await
            .unwrap();
        create_version(&pool, &gateway, &c.document_id, b"second", None, None)
            .await
            .unwrap();

        // Corrupt version 1 in both tiers out-of-band.
        let key = storage_key(&c.document_id, 1);
        std::fs::write(tmp.path().join("primary").join(&key), b"tampered").unwrap();
        std::fs::write(tmp.path().join("cache").join(&key), b"tampered").unwrap();

        let err = restore(&pool, &gateway, &c.document_id, 1, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_prune_keeps_current_and_latest_n() {
        let (tmp, pool, gateway) = setup().await;
        let c = commit_new_document(&pool, &gateway, "doc", b"v1", None, None)
            .await
            .unwrap();
        for i in 2..=5 {
            create_version(&pool, &gateway, &c.document_id, format!("v{}", i).as_bytes(), None, None)
                .await
                .unwrap();
        }

        let outcome = prune(&pool, &gateway, &c.document_id, 2).await.unwrap();
        assert_eq!(outcome.deleted, 3);
        assert_eq!(outcome.kept, 2);

        let h = history(&pool, &c.document_id).await.unwrap();
        let numbers: Vec<i64> = h.iter().map(|v| v.version_number).collect();
        assert_eq!(numbers, vec![5, 4]);

        // Pruned objects are gone from disk, kept ones remain.
        let gone = storage_key(&c.document_id, 1);
        let kept = storage_key(&c.document_id, 5);
        assert!(!tmp.path().join("primary").join(&gone).exists());
        assert!(tmp.path().join("primary").join(&kept).exists());
    }
}
