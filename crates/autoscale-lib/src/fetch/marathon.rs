//! Marathon REST client

use super::{async_trait, base_url, send, send_json, FleetManager};
use crate::error::FetchError;
use crate::models::{Application, Task};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings for Marathon
#[derive(Debug, Clone)]
pub struct MarathonConfig {
    pub endpoint: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub request_timeout: Duration,
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://marathon.mesos:8080".to_string(),
            user: None,
            password: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AppsResponse {
    #[serde(default)]
    apps: Vec<Application>,
}

#[derive(Debug, Deserialize)]
struct TasksResponse {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Serialize)]
struct ScaleRequest {
    instances: u32,
}

/// HTTP client for the Marathon fleet manager
pub struct MarathonClient {
    client: Client,
    base_url: Url,
    credentials: Option<(String, String)>,
}

impl MarathonClient {
    pub fn new(config: MarathonConfig) -> Result<Self, FetchError> {
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
            base_url: base_url(&config.endpoint)?,
            credentials,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => request.basic_auth(user, Some(password)),
            None => request,
        }
    }

    fn app_url(&self, app_id: &str) -> Result<Url, FetchError> {
        let path = format!("v2/apps/{}", app_id.trim_start_matches('/'));
        Ok(self.base_url.join(&path)?)
    }
}

#[async_trait]
impl FleetManager for MarathonClient {
    async fn fetch_applications(&self) -> Result<Vec<Application>, FetchError> {
        let url = self.base_url.join("v2/apps")?;
        let request = self.authorize(self.client.get(url.clone()));
        let response: AppsResponse = send_json(request, url.as_str()).await?;

        debug!(count = response.apps.len(), "Fetched applications");
        Ok(response.apps)
    }

    async fn fetch_tasks(&self) -> Result<Vec<Task>, FetchError> {
        let url = self.base_url.join("v2/tasks")?;
        let request = self.authorize(self.client.get(url.clone()));
        let response: TasksResponse = send_json(request, url.as_str()).await?;

        debug!(count = response.tasks.len(), "Fetched tasks");
        Ok(response.tasks)
    }

    async fn apply_scale(&self, app_id: &str, instances: u32) -> Result<(), FetchError> {
        let url = self.app_url(app_id)?;
        let request = self
            .authorize(self.client.put(url.clone()))
            .json(&ScaleRequest { instances });
        send(request, url.as_str()).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> MarathonClient {
        MarathonClient::new(MarathonConfig {
            endpoint: server.url(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_applications() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/apps")
            .match_header("accept", "application/json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "apps": [{
                        "id": "/product/us-east/service/myapp",
                        "cmd": "env && sleep 60",
                        "instances": 3,
                        "tasksRunning": 0,
                        "labels": {
                            "maxMemPercent": "1",
                            "maxCPUTime": "1",
                            "maxInstances": "1"
                        }
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let apps = client_for(&server).fetch_applications().await.unwrap();

        mock.assert_async().await;
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].id, "/product/us-east/service/myapp");
        assert_eq!(apps[0].instances, 3);
        assert_eq!(apps[0].labels["maxInstances"], "1");
    }

    #[tokio::test]
    async fn test_fetch_tasks() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/tasks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "tasks": [{
                        "appId": "/bridged-webapp",
                        "host": "10.141.141.10",
                        "id": "bridged-webapp.eb76c51f-4b4a-11e4-ae49-56847afe9799",
                        "ports": [31000],
                        "stagedAt": "2014-10-03T22:16:27.811Z"
                    }]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let tasks = client_for(&server).fetch_tasks().await.unwrap();

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].app_id, "/bridged-webapp");
        assert_eq!(tasks[0].host, "10.141.141.10");
    }

    #[tokio::test]
    async fn test_apply_scale_puts_instance_count() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("PUT", "/v2/apps/product/service/myapp")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({ "instances": 3 })))
            .with_status(200)
            .with_body(r#"{"version":"2024-01-01T00:00:00Z","deploymentId":"abc"}"#)
            .create_async()
            .await;

        client_for(&server)
            .apply_scale("/product/service/myapp", 3)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_basic_auth_sent_when_configured() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v2/apps")
            // base64("user:secret")
            .match_header("authorization", "Basic dXNlcjpzZWNyZXQ=")
            .with_status(200)
            .with_body(r#"{"apps":[]}"#)
            .create_async()
            .await;

        let client = MarathonClient::new(MarathonConfig {
            endpoint: server.url(),
            user: Some("user".to_string()),
            password: Some("secret".to_string()),
            ..Default::default()
        })
        .unwrap();

        let apps = client.fetch_applications().await.unwrap();

        mock.assert_async().await;
        assert!(apps.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_is_distinguished() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/apps")
            .with_status(401)
            .create_async()
            .await;

        let err = client_for(&server).fetch_applications().await.unwrap_err();

        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn test_rejected_scale_reports_status() {
        let mut server = Server::new_async().await;
        server
            .mock("PUT", "/v2/apps/myapp")
            .with_status(409)
            .with_body("deployment in progress")
            .create_async()
            .await;

        let err = client_for(&server).apply_scale("/myapp", 4).await.unwrap_err();

        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 409);
                assert_eq!(body, "deployment in progress");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v2/tasks")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server).fetch_tasks().await.unwrap_err();

        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
