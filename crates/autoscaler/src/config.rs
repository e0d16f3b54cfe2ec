//! Autoscaler configuration
//!
//! Layered lowest to highest: defaults, optional config file, `AUTOSCALE_*`
//! environment variables, then the `MARATHON_*` / `MESOS_*` overrides.

use anyhow::{Context, Result};
use autoscale_lib::fetch::{MarathonConfig, MesosConfig};
use autoscale_lib::PollerConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Environment variables that override single settings
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("marathon.endpoint", "MARATHON_ENDPOINT"),
    ("marathon.user", "MARATHON_USER"),
    ("marathon.password", "MARATHON_PASSWORD"),
    ("mesos.endpoint", "MESOS_ENDPOINT"),
    ("mesos.user", "MESOS_USER"),
    ("mesos.password", "MESOS_PASSWORD"),
];

/// Autoscaler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscalerConfig {
    /// Name reported in structured logs
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub marathon: MarathonSettings,

    #[serde(default)]
    pub mesos: MesosSettings,

    /// Seconds between cycle starts
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Seconds allowed for the fetch phase of a cycle
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_secs: u64,

    /// Seconds allowed for one agent's statistics
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Agents queried at once
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Log decisions without sending scale commands
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarathonSettings {
    #[serde(default = "default_marathon_endpoint")]
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for MarathonSettings {
    fn default() -> Self {
        Self {
            endpoint: default_marathon_endpoint(),
            user: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MesosSettings {
    /// Comma-separated master urls
    #[serde(default = "default_mesos_endpoint")]
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for MesosSettings {
    fn default() -> Self {
        Self {
            endpoint: default_mesos_endpoint(),
            user: None,
            password: None,
        }
    }
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "marathon-autoscaler".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_marathon_endpoint() -> String {
    "http://marathon.mesos:8080".to_string()
}

fn default_mesos_endpoint() -> String {
    "http://leader.mesos:5050".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_cycle_deadline() -> u64 {
    20
}

fn default_agent_timeout() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_concurrent_fetches() -> usize {
    16
}

fn default_initial_backoff() -> u64 {
    1
}

fn default_max_backoff() -> u64 {
    300
}

impl AutoscalerConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AUTOSCALE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        for (key, var) in ENV_OVERRIDES {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    info!(variable = %var, "Using environment override");
                    builder = builder.set_override(*key, value)?;
                }
            }
        }

        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the poll loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.cycle_deadline_secs == 0 {
            anyhow::bail!("cycle_deadline_secs must be at least 1");
        }
        if self.agent_timeout_secs == 0 {
            anyhow::bail!("agent_timeout_secs must be at least 1");
        }
        if self.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be at least 1");
        }

        url::Url::parse(&self.marathon.endpoint)
            .with_context(|| format!("Invalid Marathon endpoint {:?}", self.marathon.endpoint))?;

        let masters = self.mesos_config();
        if masters.endpoints().is_empty() {
            anyhow::bail!("At least one Mesos master endpoint is required");
        }
        for endpoint in masters.endpoints() {
            url::Url::parse(endpoint)
                .with_context(|| format!("Invalid Mesos endpoint {:?}", endpoint))?;
        }

        Ok(())
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(self.poll_interval_secs),
            cycle_deadline: Duration::from_secs(self.cycle_deadline_secs),
            agent_timeout: Duration::from_secs(self.agent_timeout_secs),
            max_concurrent_fetches: self.max_concurrent_fetches,
            initial_backoff: Duration::from_secs(self.initial_backoff_secs.max(1)),
            max_backoff: Duration::from_secs(self.max_backoff_secs.max(self.initial_backoff_secs)),
        }
    }

    pub fn marathon_config(&self) -> MarathonConfig {
        MarathonConfig {
            endpoint: self.marathon.endpoint.clone(),
            user: self.marathon.user.clone(),
            password: self.marathon.password.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn mesos_config(&self) -> MesosConfig {
        MesosConfig {
            endpoint: self.mesos.endpoint.clone(),
            user: self.mesos.user.clone(),
            password: self.mesos.password.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}
