//! Autoscale poll loop
//!
//! Each cycle fetches applications, tasks and agents, fans out to the agents
//! for statistics, correlates, decides and actuates. A failed fetch abandons
//! the cycle before the state store is touched; the loop itself never exits
//! except on shutdown.

mod fanout;


pub use fanout::{fetch_all_statistics, FanOutResult};

use crate::actuator::Actuator;
use crate::correlator::correlate;
use crate::decision::DecisionEngine;
use crate::error::{CycleError, FetchError};
use crate::fetch::{ClusterMaster, FleetManager};
use crate::health::{Component, HealthRegistry};
use crate::models::{Application, ManagedApplication, ResourceSample, ScaleDecision, Task, Verdict};
use crate::observability::{AutoscaleMetrics, StructuredLogger};
use crate::policy::{declares_policy, ScalingPolicy};
use crate::state::StateStore;
use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the poll loop
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between cycle starts (default: 30 seconds)
    pub interval: Duration,
    /// Budget for the fetch phase of one cycle (default: 20 seconds)
    pub cycle_deadline: Duration,
    /// Budget for one agent's statistics (default: 5 seconds)
    pub agent_timeout: Duration,
    /// Agents queried at once (default: 16)
    pub max_concurrent_fetches: usize,
    /// First delay when the fleet manager is unreachable at startup
    pub initial_backoff: Duration,
    /// Upper bound for the startup delay
    pub max_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            cycle_deadline: Duration::from_secs(20),
            agent_timeout: Duration::from_secs(5),
            max_concurrent_fetches: 16,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Summary of a completed cycle
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Applications returned by the fleet manager
    pub applications: usize,
    /// Applications evaluated against a valid policy
    pub managed: usize,
    /// Applications excluded because their policy labels were malformed
    pub rejected: Vec<String>,
    /// Agents that contributed no samples
    pub failed_agents: Vec<String>,
    pub decisions: Vec<ScaleDecision>,
    /// Scale commands accepted by the fleet manager
    pub scaled: Vec<(String, u32)>,
    pub actuation_failures: usize,
}

/// Inputs of one cycle, fully fetched before anything is decided
struct Snapshot {
    applications: Vec<Application>,
    tasks: Vec<Task>,
    samples: Vec<ResourceSample>,
    failed_agents: Vec<String>,
}

/// Drives fetch, correlate, decide and actuate on a fixed interval
pub struct Poller {
    fleet: Arc<dyn FleetManager>,
    cluster: Arc<dyn ClusterMaster>,
    actuator: Actuator,
    engine: DecisionEngine,
    store: StateStore,
    config: PollerConfig,
    health: HealthRegistry,
    metrics: AutoscaleMetrics,
    logger: StructuredLogger,
}

impl Poller {
    /// Create a poller with default health, metrics and logging handles
    pub fn new(
        fleet: Arc<dyn FleetManager>,
        cluster: Arc<dyn ClusterMaster>,
        config: PollerConfig,
    ) -> Self {
        Self {
            actuator: Actuator::new(fleet.clone()),
            fleet,
            cluster,
            engine: DecisionEngine::new(),
            store: StateStore::new(),
            config,
            health: HealthRegistry::new(),
            metrics: AutoscaleMetrics::new(),
            logger: StructuredLogger::new("autoscaler"),
        }
    }

    /// Per-application state retained across cycles
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run until a shutdown signal is received
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            deadline_secs = self.config.cycle_deadline.as_secs(),
            max_concurrent_fetches = self.config.max_concurrent_fetches,
            dry_run = self.actuator.is_dry_run(),
            "Starting autoscale poll loop"
        );

        if !self.wait_for_fleet_manager(&mut shutdown).await {
            info!("Shutting down before the fleet manager became reachable");
            return;
        }

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => break,
            }

            let start = Instant::now();
            let outcome = tokio::select! {
                outcome = self.run_cycle() => outcome,
                _ = shutdown.recv() => Err(CycleError::Cancelled),
            };
            let elapsed = start.elapsed();
            self.metrics.observe_cycle_duration(elapsed.as_secs_f64());

            match outcome {
                Ok(report) => {
                    self.metrics.inc_cycles_completed();
                    self.health.cycle_completed().await;
                    debug!(
                        applications = report.applications,
                        managed = report.managed,
                        rejected = report.rejected.len(),
                        failed_agents = report.failed_agents.len(),
                        scaled = report.scaled.len(),
                        elapsed_ms = elapsed.as_millis(),
                        "Cycle complete"
                    );
                }
                Err(CycleError::Cancelled) => break,
                Err(e) => {
                    self.metrics.inc_cycles_abandoned();
                    self.health
                        .set_degraded(Component::Poller, e.to_string())
                        .await;
                    self.logger.log_cycle_abandoned(&e.to_string());
                }
            }
        }

        info!("Shutting down autoscale poll loop");
    }

    /// Probe the fleet manager with exponential backoff
    ///
    /// Returns false if shutdown arrived first.
    async fn wait_for_fleet_manager(&self, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let mut backoff = self.config.initial_backoff;

        loop {
            let probe = tokio::select! {
                probe = self.fleet.fetch_applications() => probe,
                _ = shutdown.recv() => return false,
            };

            match probe {
                Ok(apps) => {
                    info!(applications = apps.len(), "Fleet manager reachable");
                    self.health.fleet_manager_reachable().await;
                    return true;
                }
                Err(e) => {
                    if let FetchError::Unauthorized { url } = &e {
                        self.logger.log_unauthorized(url);
                    } else {
                        warn!(
                            error = %e,
                            retry_in_secs = backoff.as_secs_f64(),
                            "Fleet manager unreachable"
                        );
                    }
                    self.health
                        .set_unhealthy(Component::FleetManager, e.to_string())
                        .await;
                }
            }

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.recv() => return false,
            }
            backoff = next_backoff(backoff, self.config.max_backoff);
        }
    }

    /// Run a single cycle
    ///
    /// On error nothing in the state store has changed.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let deadline = self.config.cycle_deadline;
        let snapshot = match timeout(deadline, self.fetch_snapshot()).await {
            Ok(snapshot) => snapshot?,
            Err(_) => return Err(CycleError::DeadlineExceeded(deadline)),
        };

        let mut report = self.decide(&snapshot);
        self.actuate(&mut report).await;

        Ok(report)
    }

    async fn fetch_snapshot(&self) -> Result<Snapshot, CycleError> {
        let fetched = tokio::try_join!(
            async {
                self.fleet
                    .fetch_applications()
                    .await
                    .map_err(CycleError::fetch("applications"))
            },
            async {
                self.fleet
                    .fetch_tasks()
                    .await
                    .map_err(CycleError::fetch("tasks"))
            },
            async {
                self.cluster
                    .fetch_agents()
                    .await
                    .map_err(CycleError::fetch("agents"))
            },
        );

        let (applications, tasks, agents) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                let component = match &e {
                    CycleError::Fetch {
                        resource: "agents", ..
                    } => Component::ClusterMaster,
                    _ => Component::FleetManager,
                };
                self.health.set_unhealthy(component, e.to_string()).await;
                return Err(e);
            }
        };
        self.health.set_healthy(Component::FleetManager).await;

        let agent_count = agents.len();
        let fan_out = fetch_all_statistics(
            self.cluster.clone(),
            agents,
            self.config.max_concurrent_fetches,
            self.config.agent_timeout,
            &self.metrics,
        )
        .await;

        self.metrics.set_agents_failed(fan_out.failed_agents.len() as i64);
        if fan_out.failed_agents.is_empty() {
            self.health.set_healthy(Component::ClusterMaster).await;
        } else {
            self.health
                .set_degraded(
                    Component::ClusterMaster,
                    format!(
                        "{} of {} agents unavailable",
                        fan_out.failed_agents.len(),
                        agent_count
                    ),
                )
                .await;
        }

        Ok(Snapshot {
            applications,
            tasks,
            samples: fan_out.samples,
            failed_agents: fan_out.failed_agents,
        })
    }

    /// Correlate, update state and evaluate every application
    fn decide(&mut self, snapshot: &Snapshot) -> CycleReport {
        let mut aggregates = correlate(&snapshot.applications, &snapshot.tasks, &snapshot.samples);
        let mut report = CycleReport {
            applications: snapshot.applications.len(),
            failed_agents: snapshot.failed_agents.clone(),
            ..Default::default()
        };

        for app in &snapshot.applications {
            let current = aggregates.remove(&app.id).unwrap_or_default();
            let previous = self.store.upsert(&app.id, current.clone());

            if !declares_policy(&app.labels) {
                debug!(app_id = %app.id, "Application has no scaling policy");
                continue;
            }

            let policy = match ScalingPolicy::from_labels(&app.labels) {
                Ok(policy) => policy,
                Err(e) => {
                    self.logger.log_policy_rejected(&app.id, &e.to_string());
                    report.rejected.push(app.id.clone());
                    continue;
                }
            };

            let managed = ManagedApplication {
                id: app.id.clone(),
                instances: app.instances,
                policy,
            };
            report
                .decisions
                .push(self.engine.evaluate(&managed, &current, previous.as_ref()));
            report.managed += 1;
        }

        let current_ids: HashSet<&str> = snapshot
            .applications
            .iter()
            .map(|app| app.id.as_str())
            .collect();
        let pruned = self.store.prune(&current_ids);
        if pruned > 0 {
            debug!(pruned, "Dropped state of departed applications");
        }

        self.metrics
            .set_applications(report.managed as i64, report.rejected.len() as i64);

        report
    }

    /// Send scale commands for every scale-up verdict
    async fn actuate(&self, report: &mut CycleReport) {
        for decision in &report.decisions {
            let Verdict::ScaleTo(target) = decision.verdict else {
                continue;
            };

            self.logger.log_scale_requested(
                &decision.app_id,
                decision.current_instances,
                target,
                decision.utilization.cpu_percent,
                decision.utilization.mem_percent,
            );

            match self.actuator.apply(&decision.app_id, target).await {
                Ok(()) => {
                    self.metrics.inc_scale_commands();
                    report.scaled.push((decision.app_id.clone(), target));
                }
                Err(e) => {
                    self.metrics.inc_scale_failures();
                    self.logger
                        .log_scale_failed(&decision.app_id, target, &e.to_string());
                    report.actuation_failures += 1;
                }
            }
        }

        if report.actuation_failures == 0 {
            self.health.set_healthy(Component::Actuator).await;
        } else {
            self.health
                .set_degraded(
                    Component::Actuator,
                    format!("{} scale commands failed", report.actuation_failures),
                )
                .await;
        }
    }
}

/// Double the startup delay, capped at `max`
fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Builder for creating the poll loop
pub struct PollerBuilder {
    fleet: Option<Arc<dyn FleetManager>>,
    cluster: Option<Arc<dyn ClusterMaster>>,
    config: PollerConfig,
    health: Option<HealthRegistry>,
    metrics: Option<AutoscaleMetrics>,
    logger: Option<StructuredLogger>,
    dry_run: bool,
}

impl PollerBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            fleet: None,
            cluster: None,
            config: PollerConfig::default(),
            health: None,
            metrics: None,
            logger: None,
            dry_run: false,
        }
    }

    /// Set the fleet manager (applications, tasks, scale commands)
    pub fn fleet(mut self, fleet: Arc<dyn FleetManager>) -> Self {
        self.fleet = Some(fleet);
        self
    }

    /// Set the cluster master (agents and their statistics)
    pub fn cluster(mut self, cluster: Arc<dyn ClusterMaster>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the poll interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the fetch-phase deadline
    pub fn cycle_deadline(mut self, deadline: Duration) -> Self {
        self.config.cycle_deadline = deadline;
        self
    }

    /// Set the per-agent statistics timeout
    pub fn agent_timeout(mut self, timeout: Duration) -> Self {
        self.config.agent_timeout = timeout;
        self
    }

    /// Set the number of agents queried at once
    pub fn max_concurrent_fetches(mut self, limit: usize) -> Self {
        self.config.max_concurrent_fetches = limit;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: AutoscaleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Evaluate without sending scale commands
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Build the poller
    pub fn build(self) -> Result<Poller> {
        let fleet = self
            .fleet
            .ok_or_else(|| anyhow::anyhow!("Fleet manager is required"))?;
        let cluster = self
            .cluster
            .ok_or_else(|| anyhow::anyhow!("Cluster master is required"))?;
        if self.config.max_concurrent_fetches == 0 {
            anyhow::bail!("max_concurrent_fetches must be at least 1");
        }
        if self.config.interval.is_zero() {
            anyhow::bail!("Poll interval must be non-zero");
        }

        let mut poller = Poller::new(fleet, cluster, self.config);
        poller.actuator = poller.actuator.dry_run(self.dry_run);
        if let Some(health) = self.health {
            poller.health = health;
        }
        if let Some(metrics) = self.metrics {
            poller.metrics = metrics;
        }
        if let Some(logger) = self.logger {
            poller.logger = logger;
        }

        Ok(poller)
    }
}

impl Default for PollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
