//! Bounded concurrent fetch of agent statistics
//!
//! One task per agent, at most `max_concurrency` in flight, each with its own
//! timeout. All results are joined before returning; a failed agent
//! contributes no samples.

use crate::error::FetchError;
use crate::fetch::ClusterMaster;
use crate::models::{Agent, ResourceSample};
use crate::observability::AutoscaleMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

/// Samples gathered from every reachable agent
#[derive(Debug, Default)]
pub struct FanOutResult {
    pub samples: Vec<ResourceSample>,
    /// Agent ids that contributed nothing this cycle
    pub failed_agents: Vec<String>,
}

/// Fetch statistics from all agents concurrently
pub async fn fetch_all_statistics(
    cluster: Arc<dyn ClusterMaster>,
    agents: Vec<Agent>,
    max_concurrency: usize,
    agent_timeout: Duration,
    metrics: &AutoscaleMetrics,
) -> FanOutResult {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let mut result = FanOutResult::default();
    let mut tasks = JoinSet::new();

    for agent in agents {
        if let Err(e) = agent.endpoint() {
            warn!(agent_id = %agent.id, error = %e, "Skipping agent with unusable pid");
            result.failed_agents.push(agent.id);
            continue;
        }

        let cluster = cluster.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            // Latency excludes the wait for a permit
            let start = Instant::now();
            let outcome = match timeout(agent_timeout, cluster.fetch_agent_statistics(&agent)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout(agent_timeout)),
            };
            (agent.id, start.elapsed(), outcome)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((agent_id, elapsed, Ok(samples))) => {
                metrics.observe_agent_fetch(elapsed.as_secs_f64());
                debug!(
                    agent_id = %agent_id,
                    samples = samples.len(),
                    elapsed_ms = elapsed.as_millis(),
                    "Fetched agent statistics"
                );
                result.samples.extend(samples);
            }
            Ok((agent_id, elapsed, Err(e))) => {
                metrics.observe_agent_fetch(elapsed.as_secs_f64());
                warn!(agent_id = %agent_id, error = %e, "Agent statistics unavailable this cycle");
                result.failed_agents.push(agent_id);
            }
            Err(e) => {
                // The agent id is lost with a panicked task
                warn!(error = %e, "Agent statistics task did not complete");
                result.failed_agents.push(String::from("<unknown>"));
            }
        }
    }

    result
}
