//! Scaling policy parsing from application labels
//!
//! Applications opt into autoscaling by carrying the labels below. Parsing
//! yields either a complete [`ScalingPolicy`] or a [`PolicyError`] naming the
//! offending label; nothing is silently defaulted except the trigger mode and
//! the multiplier.

use crate::error::PolicyError;
use std::collections::HashMap;
use std::fmt;

pub const MAX_MEM_PERCENT: &str = "maxMemPercent";
pub const MAX_CPU_TIME: &str = "maxCPUTime";
pub const MAX_INSTANCES: &str = "maxInstances";
pub const TRIGGER_MODE: &str = "triggerMode";
pub const AUTOSCALE_MULTIPLIER: &str = "autoscaleMultiplier";

/// Multiplier applied when the label is absent or unusable
pub const DEFAULT_AUTOSCALE_MULTIPLIER: f64 = 1.5;

/// Which resource dimension(s) trigger a scale-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    Cpu,
    Mem,
    Both,
}

impl TriggerMode {
    pub fn watches_cpu(self) -> bool {
        matches!(self, TriggerMode::Cpu | TriggerMode::Both)
    }

    pub fn watches_mem(self) -> bool {
        matches!(self, TriggerMode::Mem | TriggerMode::Both)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Cpu => f.write_str("cpu"),
            TriggerMode::Mem => f.write_str("mem"),
            TriggerMode::Both => f.write_str("both"),
        }
    }
}

/// Thresholds and limits declared by an application
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub max_mem_percent: u32,
    pub max_cpu_time: u32,
    pub max_instances: u32,
    pub trigger_mode: TriggerMode,
    pub autoscale_multiplier: f64,
}

impl ScalingPolicy {
    /// Parse the policy from an application's labels
    pub fn from_labels(labels: &HashMap<String, String>) -> Result<Self, PolicyError> {
        let max_mem_percent = positive_int(labels, MAX_MEM_PERCENT)?;
        let max_cpu_time = positive_int(labels, MAX_CPU_TIME)?;
        let max_instances = positive_int(labels, MAX_INSTANCES)?;

        let trigger_mode = match labels.get(TRIGGER_MODE).map(|v| v.trim()) {
            None | Some("") => TriggerMode::Both,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "cpu" => TriggerMode::Cpu,
                "mem" => TriggerMode::Mem,
                "both" => TriggerMode::Both,
                _ => return Err(PolicyError::UnknownTriggerMode(value.to_string())),
            },
        };

        let autoscale_multiplier = labels
            .get(AUTOSCALE_MULTIPLIER)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|m| m.is_finite() && *m > 0.0)
            .unwrap_or(DEFAULT_AUTOSCALE_MULTIPLIER);

        Ok(Self {
            max_mem_percent,
            max_cpu_time,
            max_instances,
            trigger_mode,
            autoscale_multiplier,
        })
    }
}

/// True when the labels carry any scaling policy setting at all
///
/// Applications without one are not managed by the autoscaler.
pub fn declares_policy(labels: &HashMap<String, String>) -> bool {
    [
        MAX_MEM_PERCENT,
        MAX_CPU_TIME,
        MAX_INSTANCES,
        TRIGGER_MODE,
        AUTOSCALE_MULTIPLIER,
    ]
    .iter()
    .any(|label| labels.contains_key(*label))
}

fn positive_int(labels: &HashMap<String, String>, label: &'static str) -> Result<u32, PolicyError> {
    let raw = labels.get(label).ok_or(PolicyError::MissingLabel(label))?;
    let value: i64 = raw.trim().parse().map_err(|_| PolicyError::InvalidInteger {
        label,
        value: raw.clone(),
    })?;

    if value <= 0 {
        return Err(PolicyError::NotPositive { label, value });
    }

    u32::try_from(value).map_err(|_| PolicyError::InvalidInteger {
        label,
        value: raw.clone(),
    })
}
