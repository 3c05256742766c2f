//! replisync.toml configuration parser.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::addressing::HostScheme;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub group: GroupConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub membership: MembershipConfigSection,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// StatefulSet name; also the host prefix of every member.
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Stable network suffix, e.g. `mongo.default.svc.cluster.local`.
    /// Defaults to `{name}.{namespace}.svc.cluster.local`.
    pub dns_suffix: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    #[serde(default = "default_group_id")]
    pub id: String,
    /// Minimum member count the controller never scales below.
    #[serde(default = "default_floor")]
    pub floor: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub tick_interval: String,
    pub call_timeout: String,
    pub max_attempts: u32,
    pub backoff_base: String,
    pub backoff_max: String,
    pub addressable_timeout: String,
    pub addressable_poll: String,
    pub primary_wait: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub api_url: String,
    pub token_path: Option<String>,
    pub ca_cert_path: Option<String>,
    pub insecure_skip_tls_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MembershipConfigSection {
    pub admin_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    None,
    Manual,
    Oscillate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub kind: SignalKind,
    /// Ticks to hold each direction for the oscillating signal.
    pub period_ticks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_port() -> u16 {
    27017
}

fn default_group_id() -> String {
    "rs0".to_string()
}

fn default_floor() -> u32 {
    3
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            id: default_group_id(),
            floor: default_floor(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            tick_interval: "10s".to_string(),
            call_timeout: "5s".to_string(),
            max_attempts: 5,
            backoff_base: "500ms".to_string(),
            backoff_max: "30s".to_string(),
            addressable_timeout: "2m".to_string(),
            addressable_poll: "2s".to_string(),
            primary_wait: "60s".to_string(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://kubernetes.default.svc".to_string(),
            token_path: Some("/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()),
            ca_cert_path: Some("/var/run/secrets/kubernetes.io/serviceaccount/ca.crt".to_string()),
            insecure_skip_tls_verify: false,
        }
    }
}

impl Default for MembershipConfigSection {
    fn default() -> Self {
        Self {
            admin_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            kind: SignalKind::Manual,
            period_ticks: 6,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ReconcileConfig {
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.tick_interval", &self.tick_interval)
    }

    pub fn addressable_timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.addressable_timeout", &self.addressable_timeout)
    }

    pub fn addressable_poll(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.addressable_poll", &self.addressable_poll)
    }

    pub fn primary_wait(&self) -> Result<Duration, ConfigError> {
        duration_field("reconcile.primary_wait", &self.primary_wait)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: duration_field("reconcile.backoff_base", &self.backoff_base)?,
            max_delay: duration_field("reconcile.backoff_max", &self.backoff_max)?,
            call_timeout: duration_field("reconcile.call_timeout", &self.call_timeout)?,
        })
    }
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn dns_suffix(&self) -> String {
        self.workload.dns_suffix.clone().unwrap_or_else(|| {
            format!(
                "{}.{}.svc.cluster.local",
                self.workload.name, self.workload.namespace
            )
        })
    }

    pub fn host_scheme(&self) -> HostScheme {
        HostScheme::new(&self.workload.name, &self.dns_suffix(), self.workload.port)
    }

    pub fn api_listen(&self) -> Result<SocketAddr, ConfigError> {
        self.api
            .listen
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("api.listen {:?} is not host:port", self.api.listen)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workload.name.trim().is_empty() {
            return Err(ConfigError::Invalid("workload.name must not be empty".into()));
        }
        if self.dns_suffix().trim_matches('.').is_empty() {
            return Err(ConfigError::Invalid("workload.dns_suffix must not be empty".into()));
        }
        if self.workload.port == 0 {
            return Err(ConfigError::Invalid("workload.port must be non-zero".into()));
        }
        if self.group.floor < 1 {
            return Err(ConfigError::Invalid("group.floor must be at least 1".into()));
        }
        if self.reconcile.max_attempts < 1 {
            return Err(ConfigError::Invalid("reconcile.max_attempts must be at least 1".into()));
        }
        if self.reconcile.tick_interval()?.is_zero() {
            return Err(ConfigError::Invalid("reconcile.tick_interval must be non-zero".into()));
        }
        let retry = self.reconcile.retry_policy()?;
        if retry.call_timeout.is_zero() {
            return Err(ConfigError::Invalid("reconcile.call_timeout must be non-zero".into()));
        }
        self.reconcile.addressable_timeout()?;
        self.reconcile.addressable_poll()?;
        self.reconcile.primary_wait()?;
        if self.signal.kind == SignalKind::Oscillate && self.signal.period_ticks == 0 {
            return Err(ConfigError::Invalid("signal.period_ticks must be non-zero".into()));
        }
        self.api_listen()?;
        Ok(())
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
