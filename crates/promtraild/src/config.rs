//! promtrail.toml configuration.
//!
//! Every section and field is optional; anything left out takes the
//! default shown on the corresponding `Default` impl. Durations are
//! written as strings such as `"500ms"`, `"30s"`, `"5m"`, `"24h"`, `"7d"`.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use promtrail_ingest::IngesterConfig;
use promtrail_inventory::SyncerConfig;
use promtrail_retention::RetentionConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub upstream: UpstreamSection,
    pub ingest: IngestSection,
    pub inventory: InventorySection,
    pub retention: RetentionSection,
    pub leader: LeaderSection,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub listen: SocketAddr,
    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 9464)),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub path: PathBuf,
    /// Keep everything in memory; `path` is ignored.
    pub in_memory: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/promtrail/promtrail.redb"),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamSection {
    pub url: String,
    #[serde(deserialize_with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestSection {
    pub buffer_size: usize,
    pub batch_size: usize,
    #[serde(deserialize_with = "duration_str")]
    pub flush_interval: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub ingest_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub shutdown_grace_period: Duration,
    /// Fingerprint captured queries with matrix ranges zeroed.
    pub ignore_ranges: bool,
}

impl Default for IngestSection {
    fn default() -> Self {
        let d = IngesterConfig::default();
        Self {
            buffer_size: d.buffer_size,
            batch_size: d.batch_size,
            flush_interval: d.flush_interval,
            ingest_timeout: d.ingest_timeout,
            shutdown_grace_period: d.shutdown_grace_period,
            ignore_ranges: false,
        }
    }
}

impl IngestSection {
    pub fn to_config(&self) -> IngesterConfig {
        IngesterConfig {
            buffer_size: self.buffer_size,
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            ingest_timeout: self.ingest_timeout,
            shutdown_grace_period: self.shutdown_grace_period,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InventorySection {
    pub enabled: bool,
    #[serde(deserialize_with = "duration_str")]
    pub time_window: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub interval: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub run_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub metadata_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub summary_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub job_label_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub per_job_timeout: Duration,
    pub job_index_workers: usize,
    pub metadata_sync: bool,
    pub metadata_limit: Option<usize>,
    pub job_failure_ratio: f64,
}

impl Default for InventorySection {
    fn default() -> Self {
        let d = SyncerConfig::default();
        Self {
            enabled: true,
            time_window: d.time_window,
            interval: d.interval,
            run_timeout: d.run_timeout,
            metadata_timeout: d.metadata_timeout,
            summary_timeout: d.summary_timeout,
            job_label_timeout: d.job_label_timeout,
            per_job_timeout: d.per_job_timeout,
            job_index_workers: d.job_index_workers,
            metadata_sync: d.metadata_sync_enabled,
            metadata_limit: d.metadata_limit,
            job_failure_ratio: d.job_failure_ratio,
        }
    }
}

impl InventorySection {
    pub fn to_config(&self) -> SyncerConfig {
        SyncerConfig {
            time_window: self.time_window,
            interval: self.interval,
            run_timeout: self.run_timeout,
            metadata_timeout: self.metadata_timeout,
            summary_timeout: self.summary_timeout,
            job_label_timeout: self.job_label_timeout,
            per_job_timeout: self.per_job_timeout,
            job_index_workers: self.job_index_workers,
            metadata_sync_enabled: self.metadata_sync,
            metadata_limit: self.metadata_limit,
            job_failure_ratio: self.job_failure_ratio,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionSection {
    pub enabled: bool,
    #[serde(deserialize_with = "duration_str")]
    pub interval: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub run_timeout: Duration,
    #[serde(deserialize_with = "duration_str")]
    pub max_age: Duration,
}

impl Default for RetentionSection {
    fn default() -> Self {
        let d = RetentionConfig::default();
        Self {
            enabled: true,
            interval: d.interval,
            run_timeout: d.run_timeout,
            max_age: d.max_age,
        }
    }
}

impl RetentionSection {
    pub fn to_config(&self) -> RetentionConfig {
        RetentionConfig {
            interval: self.interval,
            run_timeout: self.run_timeout,
            max_age: self.max_age,
        }
    }
}

/// How periodic work is kept to a single replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderMode {
    /// Gate on the provider's advisory locks when it has them.
    #[default]
    Auto,
    /// Always run; every replica does the work.
    Leaderless,
    /// Refuse to start unless the provider has advisory locks.
    Required,
    /// Locks shared only within this process.
    InProcess,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeaderSection {
    pub mode: LeaderMode,
    #[serde(deserialize_with = "duration_str")]
    pub retry_backoff: Duration,
}

impl Default for LeaderSection {
    fn default() -> Self {
        Self {
            mode: LeaderMode::Auto,
            retry_backoff: promtrail_leader::DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "24h" or "7d".
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "ms" => return Some(Duration::from_millis(n)),
        "" | "s" => n,
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(3600)?,
        "d" => n.checked_mul(86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid duration {s:?}")))
}
