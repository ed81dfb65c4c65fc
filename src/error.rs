//! Engine error taxonomy.
//!
//! Storage and recovery operations return [`EngineError`] so callers can
//! distinguish the recoverable cases (absent from both tiers, transient
//! storage failures) from the ones that must be surfaced (checksum
//! mismatches, exhausted retries). Application-level plumbing (CLI, config
//! loading) stays on `anyhow` and converts through the `Other` variant.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Content absent from both storage tiers. Recoverable: routes into the
    /// recovery orchestrator rather than being treated as a deletion.
    #[error("document content not found in any storage tier")]
    NotFound,

    /// Stored bytes disagree with the recorded digest. Never served.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A storage call exceeded its caller-supplied timeout. Transient.
    #[error("storage call timed out")]
    StorageTimeout,

    /// A storage tier failed for a reason other than timeout. Transient.
    #[error("storage tier unavailable: {0}")]
    StorageUnavailable(String),

    /// Single-flight guard: a recovery for this document is already
    /// running. Callers should try again later, not treat this as failure.
    #[error("recovery already in flight for this document")]
    AlreadyInFlight,

    /// Retries exhausted. Terminal until manual intervention.
    #[error("recovery abandoned after exhausting retries")]
    Abandoned,

    #[error("metadata store error: {0}")]
    Metadata(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Machine-readable code used by the HTTP error contract and the CLI.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotFound => "not_found",
            EngineError::ChecksumMismatch { .. } => "checksum_mismatch",
            EngineError::StorageTimeout => "storage_timeout",
            EngineError::StorageUnavailable(_) => "storage_unavailable",
            EngineError::AlreadyInFlight => "already_in_flight",
            EngineError::Abandoned => "abandoned",
            EngineError::Metadata(_) => "internal",
            EngineError::Other(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::NotFound.code(), "not_found");
        assert_eq!(EngineError::AlreadyInFlight.code(), "already_in_flight");
        assert_eq!(
            EngineError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .code(),
            "checksum_mismatch"
        );
        assert_eq!(EngineError::Abandoned.code(), "abandoned");
    }
}
