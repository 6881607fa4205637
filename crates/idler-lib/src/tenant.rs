//! Tenant directory client
//!
//! Resolves a user namespace to its tenant identity and answers cluster
//! capacity queries for the unidle path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantMeta {
    #[serde(default)]
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantData {
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantError {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub detail: String,
}

/// Tenant directory answer for a namespace lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantInfo {
    #[serde(default)]
    pub meta: TenantMeta,
    #[serde(default)]
    pub data: Vec<TenantData>,
    #[serde(default)]
    pub errors: Vec<TenantError>,
}

#[derive(Debug, Deserialize)]
struct CapacityInfo {
    reached_max_capacity: bool,
}

/// The directory contract the supervisor and the control plane depend on.
#[async_trait]
pub trait TenantService: Send + Sync {
    /// Resolve a namespace on a cluster to its tenant record(s).
    async fn tenant_by_namespace(&self, cluster: &str, namespace: &str) -> Result<TenantInfo>;

    /// Whether the cluster has no room for another running Jenkins.
    async fn has_reached_max_capacity(&self, cluster: &str, namespace: &str) -> Result<bool>;
}

/// HTTP implementation against the tenant directory service.
pub struct TenantClient {
    client: Client,
    base_url: String,
    auth_token: String,
}

impl TenantClient {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to create tenant HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            auth_token: auth_token.into(),
        })
    }
}

#[async_trait]
impl TenantService for TenantClient {
    async fn tenant_by_namespace(&self, cluster: &str, namespace: &str) -> Result<TenantInfo> {
        let url = format!("{}/api/tenants", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .query(&[("master_url", cluster), ("namespace", namespace)])
            .send()
            .await
            .with_context(|| format!("tenant lookup failed for namespace {namespace}"))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("tenant directory error ({status}) for namespace {namespace}");
        }

        response
            .json()
            .await
            .context("failed to decode tenant directory response")
    }

    async fn has_reached_max_capacity(&self, cluster: &str, namespace: &str) -> Result<bool> {
        let url = format!(
            "{}/api/tenants/capacity",
            self.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.auth_token)
            .query(&[("master_url", cluster), ("namespace", namespace)])
            .send()
            .await
            .with_context(|| format!("capacity check failed for namespace {namespace}"))?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("tenant directory error ({status}) on capacity check");
        }

        let info: CapacityInfo = response
            .json()
            .await
            .context("failed to decode capacity response")?;
        Ok(info.reached_max_capacity)
    }
}
