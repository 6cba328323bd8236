//! Control plane API client for the host agent.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error};

use helmsman_plan::NodeConfig;

use crate::config::Config;

/// Control plane API client.
pub struct ControlPlaneClient {
    client: reqwest::Client,
    base_url: String,
    host_address: String,
}

impl ControlPlaneClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: config.control_plane_url.clone(),
            host_address: config.host_address.clone(),
        })
    }

    /// Client against an explicit base URL, for tests.
    pub fn with_base_url(base_url: &str, host_address: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            host_address: host_address.to_string(),
        })
    }

    /// Fetch the current node config for this host.
    pub async fn fetch_node_config(&self) -> Result<NodeConfig> {
        let url = format!("{}/v1/hosts/{}/config", self.base_url, self.host_address);
        debug!(url = %url, "Fetching node config");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to fetch node config");
            anyhow::bail!("Failed to fetch node config: {} - {}", status, body);
        }

        let config: NodeConfig = response.json().await?;
        debug!(
            cluster = %config.cluster_name,
            process_count = config.processes.len(),
            file_count = config.files.len(),
            "Fetched node config"
        );

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_node_config() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "cluster_name": "local",
            "processes": {
                "kubelet": { "name": "kubelet", "image": "k:v1" }
            }
        });
        Mock::given(method("GET"))
            .and(path("/v1/hosts/10.0.0.1/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&body))
            .mount(&server)
            .await;

        let client = ControlPlaneClient::with_base_url(&server.uri(), "10.0.0.1").unwrap();
        let config = client.fetch_node_config().await.unwrap();
        assert_eq!(config.cluster_name, "local");
        assert_eq!(config.processes["kubelet"].image, "k:v1");
    }

    #[tokio::test]
    async fn test_fetch_node_config_surfaces_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = ControlPlaneClient::with_base_url(&server.uri(), "10.0.0.1").unwrap();
        let err = client.fetch_node_config().await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }
}
