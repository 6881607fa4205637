//! API client for the idler control plane

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// Client for the idler's control-plane API
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn namespace_url(&self, op: &str, namespace: &str, cluster: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("{op}/{namespace}"))
            .context("Invalid path")?;
        url.query_pairs_mut().append_pair("cluster", cluster);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    async fn post_empty(&self, url: Url) -> Result<()> {
        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(())
    }

    pub async fn idle(&self, namespace: &str, cluster: &str) -> Result<()> {
        self.post_empty(self.namespace_url("idle", namespace, cluster)?)
            .await
    }

    pub async fn un_idle(&self, namespace: &str, cluster: &str) -> Result<()> {
        self.post_empty(self.namespace_url("unidle", namespace, cluster)?)
            .await
    }

    pub async fn reset(&self, namespace: &str, cluster: &str) -> Result<()> {
        self.post_empty(self.namespace_url("reset", namespace, cluster)?)
            .await
    }

    pub async fn is_idle(&self, namespace: &str, cluster: &str) -> Result<IsIdleStatus> {
        self.get_json(self.namespace_url("isidle", namespace, cluster)?)
            .await
    }

    pub async fn status(&self, namespace: &str, cluster: &str) -> Result<StatusResponse> {
        self.get_json(self.namespace_url("status", namespace, cluster)?)
            .await
    }

    pub async fn cluster_view(&self) -> Result<Vec<ClusterDns>> {
        self.get_json(self.base_url.join("cluster").context("Invalid path")?)
            .await
    }

    pub async fn disabled_users(&self) -> Result<DisabledUsersResponse> {
        self.get_json(self.base_url.join("users/disabled").context("Invalid path")?)
            .await
    }

    pub async fn set_user_status(&self, disable: Vec<String>, enable: Vec<String>) -> Result<()> {
        let url = self.base_url.join("users").context("Invalid path")?;
        let response = self
            .client
            .put(url)
            .json(&UserStatusRequest { disable, enable })
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(())
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsIdleStatus {
    pub is_idle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub data: Option<JenkinsInfo>,
    #[serde(default)]
    pub errors: Vec<ResponseError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsInfo {
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: u32,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDns {
    pub api_url: String,
    pub app_dns: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisabledUsersResponse {
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserStatusRequest {
    disable: Vec<String>,
    enable: Vec<String>,
}
