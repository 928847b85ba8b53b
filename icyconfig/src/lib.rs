//! Configuration structures for the ICYCast proxy.
//!
//! The YAML schema is described in `config.example.yaml` at the repository
//! root.  We expose strongly typed structs with sensible defaults so the rest
//! of the workspace can depend on a stable configuration shape irrespective
//! of how the data is loaded (file, embedded defaults, tests).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    ///
    /// Violations here are fatal at startup; nothing is recoverable once the
    /// process is serving listeners with the wrong `icy-metaint`.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for station in &self.stations {
            if station.id.is_empty() {
                bail!("station with empty id");
            }
            if !station
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                bail!("station id '{}' is not URL-safe", station.id);
            }
            if !seen.insert(station.id.as_str()) {
                bail!("duplicate station id '{}'", station.id);
            }
            if station.icy.metaint == 0 {
                bail!("station '{}': icy.metaint must be positive", station.id);
            }
            if station.source.url.is_empty() {
                bail!("station '{}': source.url is required", station.id);
            }
            if station.metadata.url.is_empty() {
                bail!("station '{}': metadata.url is required", station.id);
            }
            if station.buffering.ring_bytes == 0 {
                bail!("station '{}': buffering.ring_bytes must be positive", station.id);
            }
        }
        Ok(())
    }
}

/// HTTP listener address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "ListenConfig::default_host")]
    pub host: String,
    #[serde(default = "ListenConfig::default_port")]
    pub port: u16,
}

impl ListenConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    const fn default_port() -> u16 {
        8000
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
        }
    }
}

/// One proxied station.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// URL-safe identifier, unique across the process.
    pub id: String,
    #[serde(default)]
    pub icy: IcyConfig,
    pub source: SourceConfig,
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub buffering: BufferingConfig,
}

/// ICY negotiation values advertised to listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcyConfig {
    /// Display name sent as `icy-name`.
    #[serde(default)]
    pub name: String,
    /// Payload bytes between metadata blocks (`icy-metaint`).  Immutable for
    /// the station's lifetime.
    #[serde(default = "IcyConfig::default_metaint")]
    pub metaint: usize,
    /// Advisory bitrate sent as `icy-br`.
    #[serde(default = "IcyConfig::default_bitrate")]
    pub bitrate_hint_kbps: u32,
}

impl IcyConfig {
    const fn default_metaint() -> usize {
        16384
    }

    const fn default_bitrate() -> u32 {
        128
    }
}

impl Default for IcyConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            metaint: Self::default_metaint(),
            bitrate_hint_kbps: Self::default_bitrate(),
        }
    }
}

/// Upstream audio pull.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub url: String,
    /// Extra request headers sent on connect (auth tokens, user agents, ...).
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
    #[serde(default = "SourceConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-read inactivity deadline; 0 disables it (long-lived streams).
    #[serde(default)]
    pub read_timeout_ms: u64,
    #[serde(default = "SourceConfig::default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "SourceConfig::default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl SourceConfig {
    const fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    const fn default_backoff_initial_ms() -> u64 {
        1_000
    }

    const fn default_backoff_max_ms() -> u64 {
        30_000
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms.max(1))
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms))
    }
}

/// Now-playing metadata poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    pub url: String,
    #[serde(default = "MetadataConfig::default_poll_ms")]
    pub poll_ms: u64,
    /// Age after which a value that can no longer be refreshed is dropped and
    /// empty blocks are injected instead.
    #[serde(default = "MetadataConfig::default_stale_ttl_ms")]
    pub stale_ttl_ms: u64,
    /// One-cycle change debounce: publish a new value only once it has been
    /// observed on two consecutive polls.
    #[serde(default)]
    pub debounce: bool,
    #[serde(default)]
    pub build: BuildConfig,
}

impl MetadataConfig {
    const fn default_poll_ms() -> u64 {
        3_000
    }

    const fn default_stale_ttl_ms() -> u64 {
        300_000
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }

    pub fn stale_ttl(&self) -> Duration {
        Duration::from_millis(self.stale_ttl_ms)
    }

    /// Fetch deadline defaults to the poll interval so a hung endpoint can
    /// never overlap the next wake.
    pub fn fetch_timeout(&self) -> Duration {
        self.poll_interval()
    }
}

/// How the fetched JSON document becomes an ICY string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Template with `{placeholder}` tokens, e.g.
    /// `StreamTitle='{artist} - {title}';`.
    #[serde(default = "BuildConfig::default_format")]
    pub format: String,
    /// Strip apostrophes so values cannot collide with the ICY delimiter.
    #[serde(default = "BuildConfig::default_true")]
    pub strip_single_quotes: bool,
    /// Collapse whitespace runs and trim the final string.
    #[serde(default = "BuildConfig::default_true")]
    pub normalize_whitespace: bool,
    /// Dotted JSON paths tried positionally before the top-level key of the
    /// same name as the placeholder.
    #[serde(default)]
    pub fallback_key_order: Vec<String>,
    /// Accepted for forward compatibility; the text currently passes through
    /// as UTF-8 regardless of this value.
    #[serde(default)]
    pub encoding: String,
}

impl BuildConfig {
    fn default_format() -> String {
        "StreamTitle='{artist} - {title}';".to_string()
    }

    const fn default_true() -> bool {
        true
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            format: Self::default_format(),
            strip_single_quotes: true,
            normalize_whitespace: true,
            fallback_key_order: Vec::new(),
            encoding: String::new(),
        }
    }
}

/// Per-station buffer sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferingConfig {
    /// Smoothing ring capacity in bytes.
    #[serde(default = "BufferingConfig::default_ring_bytes")]
    pub ring_bytes: usize,
    /// Byte budget for one listener's pending chunks; converted to a chunk
    /// count at attach time.
    #[serde(default = "BufferingConfig::default_client_pending_max_bytes")]
    pub client_pending_max_bytes: usize,
    /// Evict a listener after this many consecutive dropped chunks; 0 keeps
    /// degraded listeners attached indefinitely.
    #[serde(default)]
    pub evict_after_drops: u64,
}

impl BufferingConfig {
    const fn default_ring_bytes() -> usize {
        256 * 1024
    }

    const fn default_client_pending_max_bytes() -> usize {
        1024 * 1024
    }
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            ring_bytes: Self::default_ring_bytes(),
            client_pending_max_bytes: Self::default_client_pending_max_bytes(),
            evict_after_drops: 0,
        }
    }
}

/// Process-wide logging knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `icystation=debug,info`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// Emit JSON lines instead of the human formatter.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}
