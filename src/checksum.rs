//! Integrity verifier.
//!
//! SHA-256 over raw content, hex-encoded. `verify` recomputes the digest
//! of whatever bytes the gateway can currently produce for a document and
//! compares it to the recorded checksum; it never mutates state — callers
//! decide what to do with a mismatch. `verify_batch` fans out with bounded
//! parallelism since digesting is independent across documents.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::documents;
use crate::gateway::Gateway;

/// SHA-256 hex digest of raw content. Deterministic, no side effects.
pub fn compute_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Valid,
    Mismatch,
    /// No bytes could be produced from either tier.
    Unreadable,
}

impl VerifyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyStatus::Valid => "valid",
            VerifyStatus::Mismatch => "mismatch",
            VerifyStatus::Unreadable => "unreadable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Verification {
    pub status: VerifyStatus,
    pub digest: Option<String>,
}

pub async fn verify(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    document_id: &str,
) -> Result<Verification> {
    let Some(doc) = documents::get_document(pool, document_id).await? else {
        bail!("document not found: {}", document_id);
    };

    let bytes = match gateway.fetch_raw(&doc.current_key()).await {
        Ok(Some((_tier, bytes))) => bytes,
        Ok(None) | Err(_) => {
            return Ok(Verification {
                status: VerifyStatus::Unreadable,
                digest: None,
            })
        }
    };

    let digest = compute_checksum(&bytes);
    let status = if digest == doc.checksum {
        VerifyStatus::Valid
    } else {
        VerifyStatus::Mismatch
    };

    Ok(Verification {
        status,
        digest: Some(digest),
    })
}

/// Verify many documents with at most `concurrency` in flight. Results
/// come back in input order; the pass is restartable since it holds no
/// state beyond the ids it was given.
pub async fn verify_batch(
    pool: &SqlitePool,
    gateway: &Arc<Gateway>,
    ids: &[String],
    concurrency: usize,
) -> Result<Vec<(String, Verification)>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(ids.len());

    for id in ids {
        let id = id.clone();
        let pool = pool.clone();
        let gateway = Arc::clone(gateway);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let verification = verify(&pool, &gateway, &id).await;
            (id, verification)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        let (id, verification) = handle.await?;
        results.push((id, verification?));
    }
    Ok(results)
}
