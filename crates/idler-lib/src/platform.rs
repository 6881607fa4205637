//! Platform client: idle, unidle, state reads and resets against a cluster
//!
//! All calls are per-request: the cluster API URL and bearer token come from
//! the caller (the cluster view for the control plane, the watched cluster's
//! credentials for the idlers), so one client serves every cluster.

use crate::models::{DeploymentConfig, PodState};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Capabilities the idler engine needs from the container platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Scale the service in the namespace down to zero.
    async fn idle(&self, cluster: &str, token: &str, namespace: &str, service: &str) -> Result<()>;

    /// Scale the service in the namespace back up.
    async fn un_idle(
        &self,
        cluster: &str,
        token: &str,
        namespace: &str,
        service: &str,
    ) -> Result<()>;

    /// Read the current pod state of the service in the namespace.
    async fn state(
        &self,
        cluster: &str,
        token: &str,
        namespace: &str,
        service: &str,
    ) -> Result<PodState>;

    /// Delete the service's pods so the platform recreates them.
    async fn reset(&self, cluster: &str, token: &str, namespace: &str) -> Result<()>;

    /// API URL of the cluster this instance watches.
    fn api_url(&self) -> &str;
}

/// HTTP implementation against the OpenShift-style platform API.
pub struct OpenShiftClient {
    client: Client,
    api_url: String,
}

#[derive(Serialize)]
struct ScaleSpec {
    replicas: i32,
}

#[derive(Serialize)]
struct Scale {
    spec: ScaleSpec,
}

impl OpenShiftClient {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to create platform HTTP client")?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    fn dc_url(cluster: &str, namespace: &str, service: &str) -> String {
        format!(
            "{}/oapi/v1/namespaces/{}/deploymentconfigs/{}",
            cluster.trim_end_matches('/'),
            namespace,
            service
        )
    }

    async fn scale(
        &self,
        cluster: &str,
        token: &str,
        namespace: &str,
        service: &str,
        replicas: i32,
    ) -> Result<()> {
        let url = format!("{}/scale", Self::dc_url(cluster, namespace, service));
        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&Scale {
                spec: ScaleSpec { replicas },
            })
            .send()
            .await
            .with_context(|| format!("failed to scale {namespace}/{service}"))?;

        check_status(response).await?;
        debug!(namespace, service, replicas, "Scaled deployment config");
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for OpenShiftClient {
    async fn idle(&self, cluster: &str, token: &str, namespace: &str, service: &str) -> Result<()> {
        self.scale(cluster, token, namespace, service, 0).await
    }

    async fn un_idle(
        &self,
        cluster: &str,
        token: &str,
        namespace: &str,
        service: &str,
    ) -> Result<()> {
        self.scale(cluster, token, namespace, service, 1).await
    }

    async fn state(
        &self,
        cluster: &str,
        token: &str,
        namespace: &str,
        service: &str,
    ) -> Result<PodState> {
        let url = Self::dc_url(cluster, namespace, service);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("failed to read state of {namespace}/{service}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(PodState::Unknown);
        }
        let response = check_status(response).await?;
        let dc: DeploymentConfig = response
            .json()
            .await
            .context("failed to decode deployment config")?;

        Ok(pod_state_of(&dc))
    }

    async fn reset(&self, cluster: &str, token: &str, namespace: &str) -> Result<()> {
        let url = format!(
            "{}/api/v1/namespaces/{}/pods?labelSelector=name%3Djenkins",
            cluster.trim_end_matches('/'),
            namespace
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .with_context(|| format!("failed to reset pods in {namespace}"))?;

        check_status(response).await?;
        Ok(())
    }

    fn api_url(&self) -> &str {
        &self.api_url
    }
}

/// Derive the pod state from the deployment config's replica counts.
fn pod_state_of(dc: &DeploymentConfig) -> PodState {
    let available = dc.spec.replicas - dc.status.unavailable_replicas;
    if dc.spec.replicas == 0 {
        if dc.status.unavailable_replicas > 0 {
            PodState::Stopping
        } else {
            PodState::Idled
        }
    } else if available > 0 {
        PodState::Running
    } else {
        PodState::Starting
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("platform API error ({status}): {body}");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DcSpec, DcStatus};

    fn dc(replicas: i32, unavailable: i32) -> DeploymentConfig {
        DeploymentConfig {
            spec: DcSpec { replicas },
            status: DcStatus {
                unavailable_replicas: unavailable,
                ..DcStatus::default()
            },
            ..DeploymentConfig::default()
        }
    }

    #[test]
    fn test_pod_state_derivation() {
        assert_eq!(pod_state_of(&dc(0, 0)), PodState::Idled);
        assert_eq!(pod_state_of(&dc(0, 1)), PodState::Stopping);
        assert_eq!(pod_state_of(&dc(1, 1)), PodState::Starting);
        assert_eq!(pod_state_of(&dc(1, 0)), PodState::Running);
    }

    #[test]
    fn test_dc_url_shape() {
        let url = OpenShiftClient::dc_url("https://api.c1.example.com/", "alice-jenkins", "jenkins");
        assert_eq!(
            url,
            "https://api.c1.example.com/oapi/v1/namespaces/alice-jenkins/deploymentconfigs/jenkins"
        );
    }
}
