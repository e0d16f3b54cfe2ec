//! Observability infrastructure for the autoscaler
//!
//! Provides:
//! - Prometheus metrics (cycle latency, agent fetch latency, scale commands)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_gauge, Histogram, IntCounter,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for cycle and fetch latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AutoscaleMetricsInner> = OnceLock::new();

struct AutoscaleMetricsInner {
    cycle_duration_seconds: Histogram,
    agent_fetch_seconds: Histogram,
    applications_managed: IntGauge,
    applications_rejected: IntGauge,
    agents_failed: IntGauge,
    cycles_completed: IntCounter,
    cycles_abandoned: IntCounter,
    scale_commands: IntCounter,
    scale_failures: IntCounter,
}

impl AutoscaleMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "autoscaler_cycle_duration_seconds",
                "Time spent on one fetch, decide and actuate cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            agent_fetch_seconds: register_histogram!(
                "autoscaler_agent_fetch_seconds",
                "Time spent fetching statistics from a single agent",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register agent_fetch_seconds"),

            applications_managed: register_int_gauge!(
                "autoscaler_applications_managed",
                "Applications with a valid scaling policy in the last cycle"
            )
            .expect("Failed to register applications_managed"),

            applications_rejected: register_int_gauge!(
                "autoscaler_applications_rejected",
                "Applications whose scaling policy labels were malformed in the last cycle"
            )
            .expect("Failed to register applications_rejected"),

            agents_failed: register_int_gauge!(
                "autoscaler_agents_failed",
                "Agents whose statistics could not be fetched in the last cycle"
            )
            .expect("Failed to register agents_failed"),

            cycles_completed: register_int_counter!(
                "autoscaler_cycles_completed_total",
                "Total number of completed cycles"
            )
            .expect("Failed to register cycles_completed"),

            cycles_abandoned: register_int_counter!(
                "autoscaler_cycles_abandoned_total",
                "Total number of cycles abandoned before decisioning"
            )
            .expect("Failed to register cycles_abandoned"),

            scale_commands: register_int_counter!(
                "autoscaler_scale_commands_total",
                "Total number of scale commands accepted by the fleet manager"
            )
            .expect("Failed to register scale_commands"),

            scale_failures: register_int_counter!(
                "autoscaler_scale_failures_total",
                "Total number of scale commands that failed"
            )
            .expect("Failed to register scale_failures"),
        }
    }
}

/// Autoscaler metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct AutoscaleMetrics {
    _private: (),
}

impl Default for AutoscaleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoscaleMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AutoscaleMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AutoscaleMetricsInner {
        GLOBAL_METRICS.get_or_init(AutoscaleMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_agent_fetch(&self, duration_secs: f64) {
        self.inner().agent_fetch_seconds.observe(duration_secs);
    }

    /// Record the policy validation outcome of the last cycle
    pub fn set_applications(&self, managed: i64, rejected: i64) {
        self.inner().applications_managed.set(managed);
        self.inner().applications_rejected.set(rejected);
    }

    pub fn set_agents_failed(&self, count: i64) {
        self.inner().agents_failed.set(count);
    }

    pub fn inc_cycles_completed(&self) {
        self.inner().cycles_completed.inc();
    }

    pub fn inc_cycles_abandoned(&self) {
        self.inner().cycles_abandoned.inc();
    }

    pub fn inc_scale_commands(&self) {
        self.inner().scale_commands.inc();
    }

    pub fn inc_scale_failures(&self) {
        self.inner().scale_failures.inc();
    }
}

/// Structured logger for autoscaler events
///
/// Emits the notable events with a stable `event` field so they can be
/// filtered from the JSON log stream.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log a scale command about to be sent
    pub fn log_scale_requested(
        &self,
        app_id: &str,
        from: u32,
        to: u32,
        cpu_percent: Option<f64>,
        mem_percent: Option<f64>,
    ) {
        info!(
            event = "scale_requested",
            instance = %self.instance,
            app_id = %app_id,
            from = from,
            to = to,
            cpu_percent = ?cpu_percent,
            mem_percent = ?mem_percent,
            "Scaling application up"
        );
    }

    /// Log a scale command the fleet manager did not accept
    pub fn log_scale_failed(&self, app_id: &str, target: u32, reason: &str) {
        warn!(
            event = "scale_failed",
            instance = %self.instance,
            app_id = %app_id,
            target = target,
            reason = %reason,
            "Scale command failed, will be re-evaluated next cycle"
        );
    }

    /// Log a cycle abandoned before any state was touched
    pub fn log_cycle_abandoned(&self, reason: &str) {
        warn!(
            event = "cycle_abandoned",
            instance = %self.instance,
            reason = %reason,
            "Cycle abandoned, state left untouched"
        );
    }

    /// Log an application excluded because of malformed policy labels
    pub fn log_policy_rejected(&self, app_id: &str, reason: &str) {
        warn!(
            event = "policy_rejected",
            instance = %self.instance,
            app_id = %app_id,
            reason = %reason,
            "Application excluded from autoscaling this cycle"
        );
    }

    /// Log a fleet manager that rejects our credentials
    pub fn log_unauthorized(&self, url: &str) {
        error!(
            event = "unauthorized",
            instance = %self.instance,
            url = %url,
            "Fleet manager rejected credentials, check configuration"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "autoscaler_started",
            instance = %self.instance,
            version = %version,
            "Autoscaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "autoscaler_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Autoscaler shutting down"
        );
    }
}
