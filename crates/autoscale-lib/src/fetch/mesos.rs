//! Mesos master and agent client
//!
//! Agents are listed from the first reachable master; statistics are read
//! from each agent's `/monitor/statistics` endpoint.

use super::{async_trait, base_url, send_json, ClusterMaster};
use crate::error::FetchError;
use crate::models::{Agent, ResourceSample};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Connection settings for the Mesos masters
#[derive(Debug, Clone)]
pub struct MesosConfig {
    /// Comma-separated master urls, tried in order
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl Default for MesosConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://leader.mesos:5050".to_string(),
            user: None,
            password: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl MesosConfig {
    /// Master urls parsed from the comma-separated endpoint setting
    pub fn endpoints(&self) -> Vec<&str> {
        self.endpoint
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SlavesResponse {
    #[serde(default)]
    slaves: Vec<Agent>,
}

#[derive(Debug, Deserialize)]
struct ExecutorStatistics {
    executor_id: String,
    #[serde(default)]
    statistics: Statistics,
}

#[derive(Debug, Default, Deserialize)]
struct Statistics {
    #[serde(default)]
    cpus_system_time_secs: f64,
    #[serde(default)]
    cpus_user_time_secs: f64,
    #[serde(default)]
    mem_rss_bytes: u64,
    #[serde(default)]
    mem_limit_bytes: u64,
    #[serde(default)]
    timestamp: f64,
}

impl From<ExecutorStatistics> for ResourceSample {
    fn from(entry: ExecutorStatistics) -> Self {
        let stats = entry.statistics;
        Self {
            executor_id: entry.executor_id,
            cpus_system_time_secs: stats.cpus_system_time_secs,
            cpus_user_time_secs: stats.cpus_user_time_secs,
            mem_rss_bytes: stats.mem_rss_bytes,
            mem_limit_bytes: stats.mem_limit_bytes,
            timestamp: stats.timestamp,
        }
    }
}

/// HTTP client for the Mesos masters and their agents
pub struct MesosClient {
    client: Client,
    masters: Vec<Url>,
    credentials: Option<(String, String)>,
}

impl MesosClient {
    pub fn new(config: MesosConfig) -> Result<Self, FetchError> {
        let masters = config
            .endpoints()
            .into_iter()
            .map(base_url)
            .collect::<Result<Vec<_>, _>>()?;
        if masters.is_empty() {
            return Err(FetchError::NoEndpoints);
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| FetchError::Request {
                url: config.endpoint.clone(),
                source,
            })?;

        let credentials = match (config.user, config.password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some((user, password))
            }
            _ => None,
        };

        Ok(Self {
            client,
            masters,
            credentials,
        })
    }

    pub fn masters(&self) -> &[Url] {
        &self.masters
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }
}

#[async_trait]
impl ClusterMaster for MesosClient {
    async fn fetch_agents(&self) -> Result<Vec<Agent>, FetchError> {
        let mut last_error = FetchError::NoEndpoints;

        for master in &self.masters {
            let url = master.join("slaves")?;
            let request = self.authorize(self.client.get(url.clone()));
            match send_json::<SlavesResponse>(request, url.as_str()).await {
                Ok(response) => {
                    debug!(master = %master, count = response.slaves.len(), "Fetched agents");
                    return Ok(response.slaves);
                }
                Err(e) => {
                    warn!(master = %master, error = %e, "Mesos master unavailable, trying next");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_agent_statistics(&self, agent: &Agent) -> Result<Vec<ResourceSample>, FetchError> {
        let endpoint = agent.endpoint()?;
        let url = base_url(&format!("http://{}", endpoint))?.join("monitor/statistics")?;
        let entries: Vec<ExecutorStatistics> =
            send_json(self.client.get(url.clone()), url.as_str()).await?;

        Ok(entries.into_iter().map(ResourceSample::from).collect())
    }
}
