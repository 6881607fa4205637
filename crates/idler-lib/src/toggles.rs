//! Feature-toggle client
//!
//! Asks the toggle service whether idling is enabled for a tenant. The
//! answer fails open: an unreachable service or a missing toggle means
//! idling stays enabled for everyone, and only an explicit strategy can
//! narrow it down.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Toggle name governing per-tenant idling.
pub const IDLER_TOGGLE: &str = "jenkins.idler";

/// Startup bound on the first toggle fetch.
pub const MAX_WAIT_FOR_READY: Duration = Duration::from_secs(10);

const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

#[async_trait]
pub trait FeatureToggles: Send + Sync {
    /// Whether automatic idling applies to this tenant.
    async fn is_idler_enabled(&self, tenant_id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Deserialize)]
struct FeatureSpec {
    name: String,
    enabled: bool,
    #[serde(default)]
    strategies: Vec<StrategySpec>,
}

#[derive(Debug, Clone, Deserialize)]
struct StrategySpec {
    name: String,
    #[serde(default)]
    parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FeatureList {
    features: Vec<FeatureSpec>,
}

impl FeatureSpec {
    /// Evaluate the toggle for a tenant id.
    ///
    /// A `userWithId` strategy restricts the toggle to the listed ids; any
    /// other configuration leaves it governed by the enabled flag alone.
    fn enabled_for(&self, tenant_id: &str) -> bool {
        if !self.enabled {
            return false;
        }
        let user_lists: Vec<&StrategySpec> = self
            .strategies
            .iter()
            .filter(|s| s.name == "userWithId")
            .collect();
        if user_lists.is_empty() {
            return true;
        }
        user_lists.iter().any(|s| {
            s.parameters
                .get("userIds")
                .map(|ids| ids.split(',').any(|id| id.trim() == tenant_id))
                .unwrap_or(false)
        })
    }
}

/// Unleash-style toggle client polling the service's feature list.
pub struct ToggleClient {
    features: Arc<RwLock<HashMap<String, FeatureSpec>>>,
    _refresh: tokio::task::JoinHandle<()>,
}

impl ToggleClient {
    /// Connect to the toggle service.
    ///
    /// Performs one fetch bounded by [`MAX_WAIT_FOR_READY`] and fails
    /// startup when it expires, then refreshes in the background.
    pub async fn connect(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(REFRESH_INTERVAL)
            .build()
            .context("failed to create toggle HTTP client")?;

        let initial = timeout(MAX_WAIT_FOR_READY, fetch_features(&client, &base_url))
            .await
            .context("toggle client initialization timed out")??;
        info!(count = initial.len(), "Toggle client initialized and ready");

        let features = Arc::new(RwLock::new(initial));

        let refresh = {
            let features = Arc::clone(&features);
            let client = client.clone();
            let base_url = base_url.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    match fetch_features(&client, &base_url).await {
                        Ok(fresh) => {
                            *features.write().await = fresh;
                        }
                        Err(e) => {
                            // Keep serving the last good snapshot.
                            warn!(error = %e, "Toggle refresh failed");
                        }
                    }
                }
            })
        };

        Ok(Self {
            features,
            _refresh: refresh,
        })
    }
}

async fn fetch_features(client: &Client, base_url: &str) -> Result<HashMap<String, FeatureSpec>> {
    let url = format!("{}/api/client/features", base_url.trim_end_matches('/'));
    let list: FeatureList = client
        .get(&url)
        .send()
        .await
        .context("failed to reach toggle service")?
        .error_for_status()
        .context("toggle service returned an error")?
        .json()
        .await
        .context("failed to decode feature list")?;

    Ok(list
        .features
        .into_iter()
        .map(|f| (f.name.clone(), f))
        .collect())
}

#[async_trait]
impl FeatureToggles for ToggleClient {
    async fn is_idler_enabled(&self, tenant_id: &str) -> Result<bool> {
        let features = self.features.read().await;
        match features.get(IDLER_TOGGLE) {
            Some(spec) => Ok(spec.enabled_for(tenant_id)),
            None => {
                // Enabled for all users unless explicitly configured.
                debug!(toggle = IDLER_TOGGLE, "Toggle absent, defaulting to enabled");
                Ok(true)
            }
        }
    }
}
