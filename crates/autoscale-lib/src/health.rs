//! Liveness and readiness of the autoscaler
//!
//! The poller reports on four components. Readiness additionally waits for
//! the startup probe of the fleet manager and for the first completed cycle,
//! so an autoscaler that has never decided anything is not reported ready.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Parts of the autoscaler with their own health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    FleetManager,
    ClusterMaster,
    Actuator,
    Poller,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::FleetManager,
        Component::ClusterMaster,
        Component::Actuator,
        Component::Poller,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Component::FleetManager => "fleet_manager",
            Component::ClusterMaster => "cluster_master",
            Component::Actuator => "actuator",
            Component::Poller => "poller",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Partial failure, e.g. some agents or scale commands failed
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Healthy or degraded; the autoscaler keeps working in both
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last report, absent until the poller reports
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check_timestamp: Option<i64>,
}

impl ComponentHealth {
    fn unchecked() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: None,
        }
    }

    fn reported(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: Some(Utc::now().timestamp()),
        }
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Worst status among the components
    pub status: ComponentStatus,
    pub components: BTreeMap<&'static str, ComponentHealth>,
    pub cycles_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_timestamp: Option<i64>,
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug)]
struct HealthState {
    components: BTreeMap<Component, ComponentHealth>,
    fleet_manager_reachable: bool,
    cycles_completed: u64,
    last_cycle: Option<DateTime<Utc>>,
}

/// Shared health state, written by the poller and read by the API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    state: Arc<RwLock<HealthState>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    /// Every component starts out healthy and unchecked
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentHealth::unchecked()))
            .collect();

        Self {
            state: Arc::new(RwLock::new(HealthState {
                components,
                fleet_manager_reachable: false,
                cycles_completed: 0,
                last_cycle: None,
            })),
        }
    }

    async fn report(&self, component: Component, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .insert(component, ComponentHealth::reported(status, message));
    }

    pub async fn set_healthy(&self, component: Component) {
        self.report(component, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, component: Component, message: impl Into<String>) {
        self.report(component, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// The startup probe reached the fleet manager
    pub async fn fleet_manager_reachable(&self) {
        let mut state = self.state.write().await;
        state.fleet_manager_reachable = true;
        state.components.insert(
            Component::FleetManager,
            ComponentHealth::reported(ComponentStatus::Healthy, None),
        );
    }

    /// A full fetch, decide and actuate cycle finished
    pub async fn cycle_completed(&self) {
        let mut state = self.state.write().await;
        state.cycles_completed += 1;
        state.last_cycle = Some(Utc::now());
        state.components.insert(
            Component::Poller,
            ComponentHealth::reported(ComponentStatus::Healthy, None),
        );
    }

    pub async fn status(&self, component: Component) -> ComponentStatus {
        let state = self.state.read().await;
        state
            .components
            .get(&component)
            .map(|h| h.status)
            .unwrap_or(ComponentStatus::Healthy)
    }

    pub async fn health(&self) -> HealthResponse {
        let state = self.state.read().await;

        let status = state
            .components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, worst);

        HealthResponse {
            status,
            components: state
                .components
                .iter()
                .map(|(c, h)| (c.name(), h.clone()))
                .collect(),
            cycles_completed: state.cycles_completed,
            last_cycle_timestamp: state.last_cycle.map(|t| t.timestamp()),
        }
    }

    /// Ready once the fleet manager was reached, a cycle completed and no
    /// component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;

        let reason = if !state.fleet_manager_reachable {
            Some("Fleet manager not reached yet".to_string())
        } else if state.cycles_completed == 0 {
            Some("No cycle completed yet".to_string())
        } else {
            state
                .components
                .iter()
                .find(|(_, h)| h.status == ComponentStatus::Unhealthy)
                .map(|(c, h)| match &h.message {
                    Some(message) => format!("{} unhealthy: {}", c, message),
                    None => format!("{} unhealthy", c),
                })
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

fn worst(a: ComponentStatus, b: ComponentStatus) -> ComponentStatus {
    use ComponentStatus::*;
    match (a, b) {
        (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
        (Degraded, _) | (_, Degraded) => Degraded,
        _ => Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ready_registry() -> HealthRegistry {
        let registry = HealthRegistry::new();
        registry.fleet_manager_reachable().await;
        registry.cycle_completed().await;
        registry
    }

    #[tokio::test]
    async fn test_all_components_reported_before_first_check() {
        let health = HealthRegistry::new().health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components.len(), Component::ALL.len());
        assert!(health
            .components
            .values()
            .all(|h| h.last_check_timestamp.is_none()));
        assert_eq!(health.cycles_completed, 0);
        assert!(health.last_cycle_timestamp.is_none());
    }

    #[tokio::test]
    async fn test_failed_agents_degrade_overall_health() {
        let registry = HealthRegistry::new();
        registry
            .set_degraded(Component::ClusterMaster, "2 of 5 agents unavailable")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert!(health.status.is_operational());
        assert_eq!(
            health.components["cluster_master"].message.as_deref(),
            Some("2 of 5 agents unavailable")
        );
        assert!(health.components["cluster_master"]
            .last_check_timestamp
            .is_some());
    }

    #[tokio::test]
    async fn test_unhealthy_wins_over_degraded() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::Actuator, "1 scale commands failed").await;
        registry
            .set_unhealthy(Component::FleetManager, "connection refused")
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
    }

    #[tokio::test]
    async fn test_not_ready_until_fleet_manager_reached() {
        let registry = HealthRegistry::new();

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Fleet manager not reached yet")
        );
    }

    #[tokio::test]
    async fn test_not_ready_until_first_cycle() {
        let registry = HealthRegistry::new();
        registry.fleet_manager_reachable().await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(readiness.reason.as_deref(), Some("No cycle completed yet"));
    }

    #[tokio::test]
    async fn test_ready_after_first_cycle() {
        let registry = ready_registry().await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());

        let health = registry.health().await;
        assert_eq!(health.cycles_completed, 1);
        assert!(health.last_cycle_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_unhealthy_component_revokes_readiness() {
        let registry = ready_registry().await;
        registry
            .set_unhealthy(Component::FleetManager, "HTTP 502")
            .await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("fleet_manager unhealthy: HTTP 502")
        );

        // A degraded cycle keeps the autoscaler ready
        registry.set_healthy(Component::FleetManager).await;
        registry.set_degraded(Component::Poller, "cycle deadline exceeded").await;
        assert!(registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_cycle_completed_restores_poller() {
        let registry = HealthRegistry::new();
        registry.set_degraded(Component::Poller, "cycle deadline exceeded").await;
        registry.cycle_completed().await;

        assert_eq!(
            registry.status(Component::Poller).await,
            ComponentStatus::Healthy
        );
    }
}
