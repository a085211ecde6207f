//! ==============================================================================
//! config.rs - runtime configuration loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `tag-sync.toml` and loads it.
//!     a missing or invalid file is a usage error (exit code 2), never a
//!     silent fallback to defaults.
//!
//! structure:
//!     - top level: poll interval, metrics to sync, unit conversion, failure policy
//!     - LoggingConfig: default log level (RUST_LOG wins when set)
//!     - ApiConfig / OAuthConfig / HttpConfig: cloud api and the init callback
//!     - OpenTsdbConfig: where readings go
//!     - StateConfig: which backend holds the watermark ledger
//!
//! ==============================================================================

use anyhow::{bail, Context};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::error::SyncResult;
use crate::watermark::{FileBackend, RedisBackend, StateBackend};

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct TagSyncConfig {
    /// seconds to sleep between polling passes
    pub poll_interval: u64,
    /// metrics to request from GetMultiTagStatsRaw, e.g. "temperature", "cap"
    pub query_stats: Vec<String>,
    #[serde(default)]
    pub convert_to_f: bool,
    #[serde(default)]
    pub on_error: FailurePolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub http: HttpConfig,
    pub opentsdb: OpenTsdbConfig,
    pub state: StateConfig,
}

/// a problem with the configuration itself, reported with exit code 2
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// what the poller does when a metric, the directory, or a persist fails
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// log, skip, retry next pass
    #[default]
    Continue,
    /// stop the process with a runtime error
    Abort,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
}

// client id / secret come from the oauth2 apps page of the tag account
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OAuthConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// host name the browser uses to reach the callback listener
    #[serde(default = "default_http_host")]
    pub host: String,
    /// 0 picks a free port
    #[serde(default)]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenTsdbConfig {
    pub host: String,
    pub port: u16,
    pub metrics_prefix: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StateConfig {
    File { filename: PathBuf },
    Redis { host: String, port: u16, key: String },
}

fn default_http_host() -> String {
    "localhost".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { base_url: "https://www.mytaglist.com".to_string() }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { host: default_http_host(), port: 0 }
    }
}

impl StateConfig {
    /// build the backend this config selects
    pub fn backend(&self) -> SyncResult<Box<dyn StateBackend>> {
        Ok(match self {
            StateConfig::File { filename } => Box::new(FileBackend::new(filename)),
            StateConfig::Redis { host, port, key } => Box::new(RedisBackend::new(host, *port, key)?),
        })
    }
}

impl TagSyncConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: TagSyncConfig = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval == 0 {
            bail!("poll_interval must be at least 1 second");
        }
        if self.query_stats.is_empty() {
            bail!("query_stats must name at least one metric");
        }
        if let Some(blank) = self.query_stats.iter().find(|m| m.trim().is_empty()) {
            bail!("query_stats contains a blank metric name: {blank:?}");
        }
        Ok(())
    }

    /// the oauth app credentials, needed only when a token must be obtained
    pub fn require_oauth(&self) -> Result<(), ConfigError> {
        if self.oauth.id.is_empty() || self.oauth.secret.is_empty() {
            return Err(ConfigError(
                "[oauth] id and secret must be set to obtain an access token".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// log the settings that shape a run
    pub fn log_summary(&self) {
        info!(
            poll_interval_s = self.poll_interval,
            metrics = ?self.query_stats,
            convert_to_f = self.convert_to_f,
            on_error = ?self.on_error,
            "configuration"
        );
        info!(
            api = %self.api.base_url,
            opentsdb = %format!("{}:{}", self.opentsdb.host, self.opentsdb.port),
            prefix = %self.opentsdb.metrics_prefix,
            state = ?self.state,
            "endpoints"
        );
    }
}
