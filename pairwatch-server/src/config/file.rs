//! TOML file schema for the monitor configuration.

use serde::Deserialize;

/// Root of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub push: EndpointSection,
    pub pull: EndpointSection,
    /// May be omitted entirely when credentials come from the
    /// environment.
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub monitor: MonitorSection,
}

/// One upstream endpoint: `[push]` or `[pull]`.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointSection {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub path: String,
}

/// Basic-auth credentials shared by both endpoints.
///
/// Both fields can be overridden by `PAIRWATCH_USERNAME` /
/// `PAIRWATCH_PASSWORD` so the file can stay free of secrets.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthSection {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Cadences and matcher tuning: `[monitor]`.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_pull_interval")]
    pub pull_interval_secs: u64,
    #[serde(default = "default_long_pull_interval")]
    pub long_pull_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    /// How long an entry may stay unmatched before a report counts it
    /// as permanently missing from the other side.
    #[serde(default = "default_staleness")]
    pub staleness_secs: u64,
    #[serde(default)]
    pub start_from: StartFrom,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            pull_interval_secs: default_pull_interval(),
            long_pull_interval_secs: default_long_pull_interval(),
            report_interval_secs: default_report_interval(),
            staleness_secs: default_staleness(),
            start_from: StartFrom::default(),
        }
    }
}

/// Where a pull cursor starts on boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StartFrom {
    /// Skip history, observe only entries from now on.
    #[default]
    Now,
    /// Replay the feed from its beginning.
    Beginning,
}

fn default_port() -> u16 {
    443
}

fn default_pull_interval() -> u64 {
    5
}

fn default_long_pull_interval() -> u64 {
    10
}

fn default_report_interval() -> u64 {
    180
}

fn default_staleness() -> u64 {
    300
}

impl EndpointSection {
    /// Shape check used by config validation.
    pub fn looks_valid(&self) -> bool {
        !self.host.is_empty() && self.path.starts_with('/')
    }
}
