//! Adapters for the fleet manager and the cluster master
//!
//! The poller only sees the [`FleetManager`] and [`ClusterMaster`] traits.
//! [`MarathonClient`] and [`MesosClient`] implement them over HTTP.

mod marathon;
mod mesos;

pub use marathon::{MarathonClient, MarathonConfig};
pub use mesos::{MesosClient, MesosConfig};

use crate::error::FetchError;
use crate::models::{Agent, Application, ResourceSample, Task};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

pub use async_trait::async_trait;

/// Source of applications and tasks, and target of scale commands
#[async_trait]
pub trait FleetManager: Send + Sync {
    /// List every application with its labels and instance count
    async fn fetch_applications(&self) -> Result<Vec<Application>, FetchError>;

    /// List every running task
    async fn fetch_tasks(&self) -> Result<Vec<Task>, FetchError>;

    /// Set the instance count of an application
    async fn apply_scale(&self, app_id: &str, instances: u32) -> Result<(), FetchError>;
}

/// Source of agents and their per-executor statistics
#[async_trait]
pub trait ClusterMaster: Send + Sync {
    /// List the agents registered with the cluster
    async fn fetch_agents(&self) -> Result<Vec<Agent>, FetchError>;

    /// Current resource statistics of every executor on `agent`
    async fn fetch_agent_statistics(&self, agent: &Agent) -> Result<Vec<ResourceSample>, FetchError>;
}

/// Send a request and decode a JSON body, mapping failures to [`FetchError`]
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
) -> Result<T, FetchError> {
    let response = send(request, url).await?;
    response.json().await.map_err(|source| FetchError::Decode {
        url: url.to_string(),
        source,
    })
}

/// Send a request and reject non-success statuses
pub(crate) async fn send(
    request: RequestBuilder,
    url: &str,
) -> Result<reqwest::Response, FetchError> {
    let response = request
        .header(reqwest::header::ACCEPT, "application/json")
        .send()
        .await
        .map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(FetchError::Unauthorized {
            url: url.to_string(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Ensure a base url ends with `/` so that `Url::join` appends to its path
pub(crate) fn base_url(endpoint: &str) -> Result<url::Url, FetchError> {
    let trimmed = endpoint.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    Ok(url::Url::parse(&with_slash)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_appends_slash() {
        let url = base_url("http://marathon:8080/prefix").unwrap();
        assert_eq!(url.join("v2/apps").unwrap().as_str(), "http://marathon:8080/prefix/v2/apps");

        let url = base_url("http://marathon:8080/").unwrap();
        assert_eq!(url.join("v2/apps").unwrap().as_str(), "http://marathon:8080/v2/apps");
    }

    #[test]
    fn test_base_url_rejects_garbage() {
        assert!(matches!(base_url("not a url"), Err(FetchError::InvalidUrl(_))));
    }
}
