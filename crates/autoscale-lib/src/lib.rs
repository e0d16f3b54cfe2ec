//! Autoscaling library for Marathon applications on Mesos
//!
//! This crate provides the core functionality for:
//! - Fetching applications, tasks, agents and executor statistics
//! - Correlating statistics into per-application usage
//! - Retaining usage across cycles and deciding scale-ups
//! - Sending scale commands to the fleet manager
//! - Health checks and observability

pub mod actuator;
pub mod correlator;
pub mod decision;
pub mod error;
pub mod fetch;
pub mod health;
pub mod models;
pub mod observability;
pub mod policy;
pub mod poller;
pub mod state;

pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse,
    ReadinessResponse,
};
pub use models::*;
pub use observability::{AutoscaleMetrics, StructuredLogger};
pub use poller::{Poller, PollerBuilder, PollerConfig};
