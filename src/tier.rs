//! Storage tier abstraction.
//!
//! Both tiers — the primary object store and the secondary local cache —
//! implement [`ObjectTier`], so the gateway's fallback, rehydration, and
//! recovery logic never branches on the backend. Concrete backends live in
//! [`crate::tier_fs`] and [`crate::tier_s3`].

use async_trait::async_trait;

use crate::error::EngineResult;

/// Which of the two tiers a location belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Cache,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Primary => "primary",
            Tier::Cache => "cache",
        }
    }

    pub fn other(&self) -> Tier {
        match self {
            Tier::Primary => Tier::Cache,
            Tier::Cache => Tier::Primary,
        }
    }
}

/// Uniform get/put/exists/delete over one storage backend.
///
/// `get` distinguishes "object absent" (`Ok(None)`) from "backend failed"
/// (`Err`); the gateway treats only the former as confirmed absence.
#[async_trait]
pub trait ObjectTier: Send + Sync {
    /// Backend label for log lines (e.g. `"s3"`, `"filesystem"`).
    fn label(&self) -> &str;

    async fn get(&self, key: &str) -> EngineResult<Option<Vec<u8>>>;

    async fn put(&self, key: &str, bytes: &[u8]) -> EngineResult<()>;

    async fn exists(&self, key: &str) -> EngineResult<bool>;

    async fn delete(&self, key: &str) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_tier() {
        assert_eq!(Tier::Primary.other(), Tier::Cache);
        assert_eq!(Tier::Cache.other(), Tier::Primary);
        assert_eq!(Tier::Primary.as_str(), "primary");
    }
}
