use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure for fleetflow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetflowConfig {
    /// Background coordinator settings
    pub coordinator: CoordinatorSettings,
    /// Approval service client settings
    pub approval: ApprovalSettings,
    /// Notification settings
    pub notification: NotificationSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Seconds between evaluation passes
    pub poll_interval_secs: u64,
    /// Random extra delay per pass, in milliseconds
    pub jitter_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            jitter_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Requests per second against the approval service
    pub requests_per_second: u32,
    /// Burst capacity on top of the steady rate
    pub burst_capacity: u32,
    /// Seconds approval log responses stay cached
    pub log_cache_ttl_secs: u64,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            requests_per_second: 1,
            burst_capacity: 10,
            log_cache_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Master switch for outbound notifications
    pub enabled: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl FleetflowConfig {
    /// Load configuration: defaults, then an optional file, then
    /// FLEETFLOW_-prefixed environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        } else {
            builder = builder.add_source(File::with_name("fleetflow").required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("FLEETFLOW")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }
}
