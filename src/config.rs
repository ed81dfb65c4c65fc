use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory of the secondary (cache) tier.
    pub cache_dir: PathBuf,
    pub primary: PrimaryTierConfig,
}

/// Primary-tier backend selection.
///
/// `kind = "s3"` talks to an S3-compatible object store; `kind = "filesystem"`
/// uses a local directory as the primary tier, which is what development and
/// the test suite run against.
#[derive(Debug, Deserialize, Clone)]
pub struct PrimaryTierConfig {
    pub kind: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Read-time checksum audit: digest every successful read and fail
    /// closed on mismatch.
    #[serde(default = "default_verify_reads")]
    pub verify_reads: bool,
    /// Per-storage-call timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            verify_reads: true,
            timeout_secs: 30,
        }
    }
}

fn default_verify_reads() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecoveryConfig {
    /// Retry-queue attempts before an item is abandoned.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Exponential backoff base: `next = now + base * 2^attempts`.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: i64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: i64,
    /// Bounded worker pool size. Scan verification and the retry-queue
    /// processor each bound their own pool with this value.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Per-attempt timeout for a single recovery run.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    /// How often the server's background sweep runs the retry queue.
    /// Zero disables the sweep; the queue can still be driven manually.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            concurrency: default_concurrency(),
            attempt_timeout_secs: default_attempt_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_base() -> i64 {
    60
}
fn default_backoff_cap() -> i64 {
    3600
}
fn default_concurrency() -> usize {
    8
}
fn default_attempt_timeout() -> u64 {
    120
}
fn default_sweep_interval() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    match config.storage.primary.kind.as_str() {
        "s3" => {
            if config.storage.primary.bucket.is_none() {
                anyhow::bail!("storage.primary.bucket must be set when kind is 's3'");
            }
        }
        "filesystem" => {
            if config.storage.primary.root.is_none() {
                anyhow::bail!("storage.primary.root must be set when kind is 'filesystem'");
            }
        }
        other => anyhow::bail!(
            "Unknown primary tier kind: '{}'. Must be s3 or filesystem.",
            other
        ),
    }

    if config.recovery.max_attempts == 0 {
        anyhow::bail!("recovery.max_attempts must be >= 1");
    }
    if config.recovery.concurrency == 0 {
        anyhow::bail!("recovery.concurrency must be >= 1");
    }
    if config.recovery.backoff_base_secs < 1 {
        anyhow::bail!("recovery.backoff_base_secs must be >= 1");
    }
    if config.recovery.backoff_cap_secs < config.recovery.backoff_base_secs {
        anyhow::bail!("recovery.backoff_cap_secs must be >= recovery.backoff_base_secs");
    }
    if config.gateway.timeout_secs == 0 {
        anyhow::bail!("gateway.timeout_secs must be >= 1");
    }

    Ok(config)
}
