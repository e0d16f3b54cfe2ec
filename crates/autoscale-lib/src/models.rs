//! Core data models for the autoscaler

use crate::error::FetchError;
use crate::policy::ScalingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Application as reported by the fleet manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    #[serde(default)]
    pub instances: u32,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Application whose scaling policy labels parsed successfully
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedApplication {
    pub id: String,
    pub instances: u32,
    pub policy: ScalingPolicy,
}

/// One running instance of an application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "appId")]
    pub app_id: String,
    #[serde(default)]
    pub host: String,
}

/// Worker node registered with the cluster master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    /// Process identifier of the form `name@host:port`
    pub pid: String,
    #[serde(default)]
    pub hostname: String,
}

impl Agent {
    /// Network endpoint (`host:port`) taken from the process identifier
    pub fn endpoint(&self) -> Result<&str, FetchError> {
        match self.pid.split_once('@') {
            Some((_, endpoint)) if !endpoint.is_empty() => Ok(endpoint),
            _ => Err(FetchError::InvalidPid(self.pid.clone())),
        }
    }
}

/// Point-in-time resource usage of a single executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub executor_id: String,
    pub cpus_system_time_secs: f64,
    pub cpus_user_time_secs: f64,
    pub mem_rss_bytes: u64,
    pub mem_limit_bytes: u64,
    pub timestamp: f64,
}

impl ResourceSample {
    /// Total CPU seconds consumed (system + user)
    pub fn cpu_seconds(&self) -> f64 {
        self.cpus_system_time_secs + self.cpus_user_time_secs
    }
}

/// Usage of all matched executors of one application, summed for a cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageAggregate {
    pub cpu_seconds: f64,
    pub mem_rss_bytes: u64,
    pub mem_limit_bytes: u64,
    /// Most recent timestamp among the summed samples
    pub timestamp: f64,
    /// Executors whose samples were summed, sorted
    pub executors: Vec<String>,
}

impl UsageAggregate {
    /// Fold one more sample into the aggregate
    pub fn add(&mut self, sample: &ResourceSample) {
        if let Err(pos) = self.executors.binary_search(&sample.executor_id) {
            self.executors.insert(pos, sample.executor_id.clone());
        } else {
            // Duplicate executor report, already counted
            return;
        }

        self.cpu_seconds += sample.cpu_seconds();
        self.mem_rss_bytes = self.mem_rss_bytes.saturating_add(sample.mem_rss_bytes);
        self.mem_limit_bytes = self.mem_limit_bytes.saturating_add(sample.mem_limit_bytes);
        if self.executors.len() == 1 || sample.timestamp > self.timestamp {
            self.timestamp = sample.timestamp;
        }
    }

    /// Number of samples that contributed
    pub fn samples(&self) -> usize {
        self.executors.len()
    }

    /// True when no sample matched this application
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// True when both aggregates summed the same executors
    pub fn covers_same_executors(&self, other: &UsageAggregate) -> bool {
        self.executors == other.executors
    }
}

/// Outcome of evaluating one application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    NoAction,
    ScaleTo(u32),
}

/// Utilization figures derived for one application this cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    /// Memory rss as a percentage of the memory limit
    pub mem_percent: Option<f64>,
    /// CPU seconds per wall-clock second, as a percentage
    pub cpu_percent: Option<f64>,
}

/// Per-cycle decision for one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleDecision {
    pub app_id: String,
    pub current_instances: u32,
    pub verdict: Verdict,
    pub utilization: Utilization,
}
