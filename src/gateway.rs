//! Tiered storage gateway.
//!
//! Uniform read/write over the primary object store and the local cache
//! tier. Reads try primary first and fall back to the cache; a cache hit
//! triggers an opportunistic background re-upload to primary
//! ("rehydration") that never blocks the caller. Reads can be
//! digest-audited and fail closed: bytes whose checksum disagrees with the
//! metadata store are never returned to a caller.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::audit;
use crate::checksum::compute_checksum;
use crate::config::Config;
use crate::documents;
use crate::error::{EngineError, EngineResult};
use crate::locks::DocumentLocks;
use crate::models::{Document, EventType};
use crate::recovery;
use crate::tier::{ObjectTier, Tier};
use crate::tier_fs::{validate_key, FsTier};
use crate::tier_s3::S3Tier;

pub struct Gateway {
    primary: Box<dyn ObjectTier>,
    cache: Box<dyn ObjectTier>,
    locks: Arc<DocumentLocks>,
    verify_reads: bool,
}

/// Where a committed object ended up.
pub struct StoredLocations {
    pub primary: Option<String>,
    pub cache: Option<String>,
}

impl Gateway {
    /// Build the process-scoped gateway from config: one primary backend
    /// (S3 or a local directory), one cache directory, one lock table.
    pub fn from_config(config: &Config) -> Result<Arc<Self>> {
        let primary: Box<dyn ObjectTier> = match config.storage.primary.kind.as_str() {
            "s3" => Box::new(S3Tier::new(
                &config.storage.primary,
                config.gateway.timeout_secs,
            )?),
            "filesystem" => {
                let root = config
                    .storage
                    .primary
                    .root
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("storage.primary.root is required"))?;
                Box::new(FsTier::new(root, "filesystem"))
            }
            other => anyhow::bail!("Unknown primary tier kind: '{}'", other),
        };
        let cache = Box::new(FsTier::new(config.storage.cache_dir.clone(), "cache"));

        Ok(Arc::new(Self {
            primary,
            cache,
            locks: DocumentLocks::new(),
            verify_reads: config.gateway.verify_reads,
        }))
    }

    pub fn locks(&self) -> &Arc<DocumentLocks> {
        &self.locks
    }

    fn tier(&self, tier: Tier) -> &dyn ObjectTier {
        match tier {
            Tier::Primary => self.primary.as_ref(),
            Tier::Cache => self.cache.as_ref(),
        }
    }

    pub async fn exists_in(&self, tier: Tier, key: &str) -> EngineResult<bool> {
        self.tier(tier).exists(key).await
    }

    pub async fn put_in(&self, tier: Tier, key: &str, bytes: &[u8]) -> EngineResult<()> {
        validate_key(key)?;
        self.tier(tier).put(key, bytes).await
    }

    pub async fn delete_everywhere(&self, key: &str) -> EngineResult<()> {
        self.primary.delete(key).await?;
        self.cache.delete(key).await?;
        Ok(())
    }

    /// Raw tiered read: primary first, then cache, no checksum audit.
    /// `Ok(None)` means both tiers confirmed absence; a tier error with no
    /// copy found anywhere propagates as transient so callers can retry.
    pub async fn fetch_raw(&self, key: &str) -> EngineResult<Option<(Tier, Vec<u8>)>> {
        let mut last_err: Option<EngineError> = None;

        for tier in [Tier::Primary, Tier::Cache] {
            match self.tier(tier).get(key).await {
                Ok(Some(bytes)) => return Ok(Some((tier, bytes))),
                Ok(None) => {}
                Err(e) => {
                    eprintln!(
                        "warning: {} tier read failed for '{}': {}",
                        tier.as_str(),
                        key,
                        e
                    );
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    /// Find a copy of `key` whose digest matches `checksum`. Corrupt or
    /// missing copies are skipped; used by the recovery strategies, which
    /// must be able to inspect untrusted bytes.
    pub async fn valid_copy(
        &self,
        key: &str,
        checksum: &str,
    ) -> EngineResult<Option<(Tier, Vec<u8>)>> {
        for tier in [Tier::Primary, Tier::Cache] {
            if let Ok(Some(bytes)) = self.tier(tier).get(key).await {
                if compute_checksum(&bytes) == checksum {
                    return Ok(Some((tier, bytes)));
                }
            }
        }
        Ok(None)
    }

    /// Serve the current version of a document, fail-closed.
    ///
    /// Primary first; on absence or failure, the cache. A successful cache
    /// read schedules rehydration of the primary copy in the background.
    /// With `verify_reads` on, bytes are digest-checked before either
    /// serving or rehydrating, and a mismatch is returned as a recoverable
    /// error with exactly one `checksum_mismatch` event recorded.
    pub async fn fetch(self: &Arc<Self>, pool: &SqlitePool, doc: &Document) -> EngineResult<Vec<u8>> {
        let key = doc.current_key();
        let mut primary_err = None;

        match self.primary.get(&key).await {
            Ok(Some(bytes)) => return self.audited(pool, doc, Tier::Primary, bytes).await,
            Ok(None) => {}
            Err(e) => {
                eprintln!("warning: primary tier read failed for {}: {}", doc.id, e);
                primary_err = Some(e);
            }
        }

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => {
                let bytes = self.audited(pool, doc, Tier::Cache, bytes).await?;
                self.spawn_rehydration(pool.clone(), doc.id.clone(), key, bytes.clone());
                Ok(bytes)
            }
            // A primary failure with the cache empty is transient, not a
            // confirmed absence. A confirmed absence whose recovery has
            // been abandoned is reported as such.
            Ok(None) => match primary_err {
                Some(e) => Err(e),
                None => {
                    if recovery::last_attempt_abandoned(pool, &doc.id)
                        .await
                        .map_err(EngineError::Other)?
                    {
                        Err(EngineError::Abandoned)
                    } else {
                        Err(EngineError::NotFound)
                    }
                }
            },
            Err(e) => Err(e),
        }
    }

    async fn audited(
        &self,
        pool: &SqlitePool,
        doc: &Document,
        tier: Tier,
        bytes: Vec<u8>,
    ) -> EngineResult<Vec<u8>> {
        if !self.verify_reads {
            return Ok(bytes);
        }

        let digest = compute_checksum(&bytes);
        if digest == doc.checksum {
            return Ok(bytes);
        }

        audit::record_or_warn(
            pool,
            &doc.id,
            EventType::ChecksumMismatch,
            &format!(
                "read audit on {} tier: expected {}, got {}",
                tier.as_str(),
                doc.checksum,
                digest
            ),
            None,
        )
        .await;

        Err(EngineError::ChecksumMismatch {
            expected: doc.checksum.clone(),
            actual: digest,
        })
    }

    /// Fire-and-forget primary re-upload after a cache-tier hit. Takes the
    /// per-document lock so it cannot race a recovery or a version commit;
    /// if the lock is busy the in-flight operation owns the repair.
    fn spawn_rehydration(self: &Arc<Self>, pool: SqlitePool, document_id: String, key: String, bytes: Vec<u8>) {
        let gateway = Arc::clone(self);
        tokio::spawn(async move {
            let Some(_guard) = gateway.locks.try_acquire(&document_id) else {
                return;
            };
            match gateway.primary.put(&key, &bytes).await {
                Ok(()) => {
                    if let Err(e) =
                        documents::set_primary_location(&pool, &document_id, Some(&key)).await
                    {
                        eprintln!(
                            "warning: rehydrated {} but failed to record location: {}",
                            document_id, e
                        );
                    }
                }
                Err(e) => eprintln!(
                    "warning: rehydration of {} to primary failed: {}",
                    document_id, e
                ),
            }
        });
    }

    /// Write path for a new version's object.
    ///
    /// Primary is written first; if it fails, the object still lands in
    /// the cache tier and a retry-queue item is enqueued for the primary
    /// upload. Only when both tiers reject the bytes does the commit fail,
    /// since no durable copy would exist anywhere.
    pub async fn store_new_object(
        &self,
        pool: &SqlitePool,
        document_id: &str,
        key: &str,
        bytes: &[u8],
    ) -> EngineResult<StoredLocations> {
        validate_key(key)?;

        let primary = match self.primary.put(key, bytes).await {
            Ok(()) => Some(key.to_string()),
            Err(e) => {
                eprintln!(
                    "warning: primary write failed for {} ('{}'): {}",
                    document_id, key, e
                );
                None
            }
        };

        let cache = match self.cache.put(key, bytes).await {
            Ok(()) => Some(key.to_string()),
            Err(e) => {
                eprintln!(
                    "warning: cache write failed for {} ('{}'): {}",
                    document_id, key, e
                );
                None
            }
        };

        if primary.is_none() && cache.is_none() {
            return Err(EngineError::StorageUnavailable(
                "both storage tiers rejected the write".to_string(),
            ));
        }

        if primary.is_none() {
            // Secondary-only commit: repair the primary copy asynchronously.
            if let Err(e) =
                recovery::enqueue(pool, document_id, "primary write failed during commit").await
            {
                eprintln!(
                    "warning: failed to enqueue primary upload retry for {}: {}",
                    document_id, e
                );
            }
        }

        Ok(StoredLocations { primary, cache })
    }
}
