//! Core data models for the integrity engine.
//!
//! One struct per metadata-store row: documents, their immutable version
//! ledger, the append-only recovery event log, and the retry work queue.
//! Enums are stored as lowercase strings in SQLite and round-trip through
//! `as_str`/`parse`.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Storage key for one version of a document. Identical in both tiers.
pub fn storage_key(document_id: &str, version: i64) -> String {
    format!("documents/{}/v{}", document_id, version)
}

/// Canonical document record.
///
/// `checksum` always refers to the current version and is non-null from the
/// moment version 1 commits. A document with no location in either tier is
/// terminal-missing and is flagged by the scanner, never silently served.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub display_name: String,
    pub current_version: i64,
    pub checksum: String,
    pub primary_location: Option<String>,
    pub cache_location: Option<String>,
    pub preview_status: PreviewStatus,
    pub file_exists: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    pub fn from_row(row: &SqliteRow) -> Self {
        let preview: String = row.get("preview_status");
        Self {
            id: row.get("id"),
            display_name: row.get("display_name"),
            current_version: row.get("current_version"),
            checksum: row.get("checksum"),
            primary_location: row.get("primary_location"),
            cache_location: row.get("cache_location"),
            preview_status: PreviewStatus::parse(&preview).unwrap_or(PreviewStatus::Original),
            file_exists: row.get::<i64, _>("file_exists") != 0,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    /// Storage key of the current version.
    pub fn current_key(&self) -> String {
        storage_key(&self.id, self.current_version)
    }
}

/// Immutable version ledger entry. Version numbers per document are
/// contiguous and strictly increasing from 1; restore copies old content
/// forward as a new entry, it never rewrites history.
#[derive(Debug, Clone)]
pub struct DocumentVersion {
    pub document_id: String,
    pub version_number: i64,
    pub checksum: String,
    pub storage_key: String,
    pub created_by: Option<String>,
    pub notes: Option<String>,
    pub created_at: i64,
}

impl DocumentVersion {
    pub fn from_row(row: &SqliteRow) -> Self {
        Self {
            document_id: row.get("document_id"),
            version_number: row.get("version_number"),
            checksum: row.get("checksum"),
            storage_key: row.get("storage_key"),
            created_by: row.get("created_by"),
            notes: row.get("notes"),
            created_at: row.get("created_at"),
        }
    }
}

/// Append-only audit event. Never updated or deleted.
#[derive(Debug, Clone)]
pub struct RecoveryEvent {
    pub id: i64,
    pub document_id: String,
    pub event_type: EventType,
    pub detail: String,
    pub actor_id: Option<String>,
    pub created_at: i64,
}

impl RecoveryEvent {
    pub fn from_row(row: &SqliteRow) -> Self {
        let kind: String = row.get("event_type");
        Self {
            id: row.get("id"),
            document_id: row.get("document_id"),
            event_type: EventType::parse(&kind).unwrap_or(EventType::RecoveryFailed),
            detail: row.get("detail"),
            actor_id: row.get("actor_id"),
            created_at: row.get("created_at"),
        }
    }
}

/// Mutable retry-queue row. At most one `pending`/`in_progress` row per
/// document, enforced by a partial unique index on the table.
#[derive(Debug, Clone)]
pub struct RetryQueueItem {
    pub id: i64,
    pub document_id: String,
    pub attempt_count: i64,
    pub next_attempt_at: i64,
    pub last_error: Option<String>,
    pub status: RetryStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RetryQueueItem {
    pub fn from_row(row: &SqliteRow) -> Self {
        let status: String = row.get("status");
        Self {
            id: row.get("id"),
            document_id: row.get("document_id"),
            attempt_count: row.get("attempt_count"),
            next_attempt_at: row.get("next_attempt_at"),
            last_error: row.get("last_error"),
            status: RetryStatus::parse(&status).unwrap_or(RetryStatus::Failed),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStatus {
    Original,
    Regenerated,
    Placeholder,
}

impl PreviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreviewStatus::Original => "original",
            PreviewStatus::Regenerated => "regenerated",
            PreviewStatus::Placeholder => "placeholder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "original" => Some(PreviewStatus::Original),
            "regenerated" => Some(PreviewStatus::Regenerated),
            "placeholder" => Some(PreviewStatus::Placeholder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    MissingDetected,
    RecoveryInitiated,
    RecoverySucceeded,
    RecoveryFailed,
    ChecksumMismatch,
    PreviewStatusChanged,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MissingDetected => "missing_detected",
            EventType::RecoveryInitiated => "recovery_initiated",
            EventType::RecoverySucceeded => "recovery_succeeded",
            EventType::RecoveryFailed => "recovery_failed",
            EventType::ChecksumMismatch => "checksum_mismatch",
            EventType::PreviewStatusChanged => "preview_status_changed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing_detected" => Some(EventType::MissingDetected),
            "recovery_initiated" => Some(EventType::RecoveryInitiated),
            "recovery_succeeded" => Some(EventType::RecoverySucceeded),
            "recovery_failed" => Some(EventType::RecoveryFailed),
            "checksum_mismatch" => Some(EventType::ChecksumMismatch),
            "preview_status_changed" => Some(EventType::PreviewStatusChanged),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Abandoned,
}

impl RetryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryStatus::Pending => "pending",
            RetryStatus::InProgress => "in_progress",
            RetryStatus::Succeeded => "succeeded",
            RetryStatus::Failed => "failed",
            RetryStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RetryStatus::Pending),
            "in_progress" => Some(RetryStatus::InProgress),
            "succeeded" => Some(RetryStatus::Succeeded),
            "failed" => Some(RetryStatus::Failed),
            "abandoned" => Some(RetryStatus::Abandoned),
            _ => None,
        }
    }

    /// Active rows block a new enqueue for the same document.
    pub fn is_active(&self) -> bool {
        matches!(self, RetryStatus::Pending | RetryStatus::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_shape() {
        assert_eq!(storage_key("abc", 3), "documents/abc/v3");
    }

    #[test]
    fn test_enum_round_trips() {
        for e in [
            EventType::MissingDetected,
            EventType::RecoveryInitiated,
            EventType::RecoverySucceeded,
            EventType::RecoveryFailed,
            EventType::ChecksumMismatch,
            EventType::PreviewStatusChanged,
        ] {
            assert_eq!(EventType::parse(e.as_str()), Some(e));
        }
        for s in [
            RetryStatus::Pending,
            RetryStatus::InProgress,
            RetryStatus::Succeeded,
            RetryStatus::Failed,
            RetryStatus::Abandoned,
        ] {
            assert_eq!(RetryStatus::parse(s.as_str()), Some(s));
        }
        for p in [
            PreviewStatus::Original,
            PreviewStatus::Regenerated,
            PreviewStatus::Placeholder,
        ] {
            assert_eq!(PreviewStatus::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn test_active_statuses() {
        assert!(RetryStatus::Pending.is_active());
        assert!(RetryStatus::InProgress.is_active());
        assert!(!RetryStatus::Succeeded.is_active());
        assert!(!RetryStatus::Abandoned.is_active());
    }
}
