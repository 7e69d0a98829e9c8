//! Resolved runtime configuration handed to the wiring layer.

use crate::config::file::{FileConfig, StartFrom};
use pairwatch_core::entities::HttpConfig;
use pairwatch_core::processors::Cursor;
use std::time::Duration;

/// Everything `main` needs to wire the monitor, with durations resolved
/// and credentials folded into the endpoint configs.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub push: HttpConfig,
    pub pull: HttpConfig,
    pub pull_interval: Duration,
    pub long_pull_interval: Duration,
    pub report_interval: Duration,
    /// Staleness threshold for unmatched pending entries.
    pub staleness: time::Duration,
    pub start_from: StartFrom,
}

impl MonitorConfig {
    pub fn from_file(config: FileConfig) -> Self {
        let auth = config.auth;
        Self {
            push: HttpConfig::new(
                config.push.host,
                config.push.port,
                config.push.path,
                auth.username.clone(),
                auth.password.clone(),
            ),
            pull: HttpConfig::new(
                config.pull.host,
                config.pull.port,
                config.pull.path,
                auth.username,
                auth.password,
            ),
            pull_interval: Duration::from_secs(config.monitor.pull_interval_secs),
            long_pull_interval: Duration::from_secs(config.monitor.long_pull_interval_secs),
            report_interval: Duration::from_secs(config.monitor.report_interval_secs),
            staleness: time::Duration::seconds(config.monitor.staleness_secs as i64),
            start_from: config.monitor.start_from,
        }
    }

    /// A fresh cursor at the configured starting position.
    pub fn start_cursor(&self) -> Cursor {
        match self.start_from {
            StartFrom::Now => Cursor::now(),
            StartFrom::Beginning => Cursor::beginning(),
        }
    }
}
