//! Supervisor: tenant registry and event fan-in
//!
//! Owns the namespace → user and namespace → channel registries, lazily
//! materialises an idler the first time a namespace is observed, and routes
//! build and deployment-config events into the owning idler.
//!
//! Most observation events repeat a previously seen phase and name because
//! only timestamps changed; the equality guards below suppress those no-op
//! notifications so the channels carry state changes only.

#[cfg(test)]
mod tests;

use crate::cluster::ClusterCredentials;
use crate::idler::{IdlerSettings, UserIdler, USER_CHANNEL_CAPACITY};
use crate::models::{user_namespace, Activity, Build, DeploymentConfig, DisabledUsers, User};
use crate::observability::IdlerMetrics;
use crate::platform::PlatformClient;
use crate::tenant::TenantService;
use crate::toggles::FeatureToggles;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Condition type that signals Jenkins became ready.
const AVAILABLE_CONDITION: &str = "Available";

/// Bound on a single notify send; a slow idler sheds load past this.
pub const CHANNEL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("tenant directory returned {count} tenants for namespace {namespace}")]
    TenantResolution { namespace: String, count: usize },
    #[error("could not find tenant in cluster {cluster} for namespace {namespace}: {detail}")]
    TenantNotFound {
        cluster: String,
        namespace: String,
        detail: String,
    },
    #[error("tenant directory request failed: {0}")]
    TenantRequest(anyhow::Error),
    #[error("malformed deployment config event: {0}")]
    MalformedEvent(String),
}

/// Registry of per-user idlers and router for observation events.
pub struct Supervisor {
    users: DashMap<String, User>,
    channels: DashMap<String, mpsc::Sender<User>>,
    platform: Arc<dyn PlatformClient>,
    tenant: Arc<dyn TenantService>,
    toggles: Arc<dyn FeatureToggles>,
    disabled_users: Arc<DisabledUsers>,
    credentials: ClusterCredentials,
    settings: IdlerSettings,
    metrics: IdlerMetrics,
    shutdown: broadcast::Sender<()>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        tenant: Arc<dyn TenantService>,
        toggles: Arc<dyn FeatureToggles>,
        disabled_users: Arc<DisabledUsers>,
        credentials: ClusterCredentials,
        settings: IdlerSettings,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            users: DashMap::new(),
            channels: DashMap::new(),
            platform,
            tenant,
            toggles,
            disabled_users,
            credentials,
            settings,
            metrics: IdlerMetrics::new(),
            shutdown,
        }
    }

    /// Snapshot of the user record for a namespace; zero value when the
    /// namespace has never been observed.
    pub fn get_user(&self, namespace: &str) -> User {
        self.users
            .get(namespace)
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Process a build event observed in a user namespace.
    pub async fn handle_build(&self, build: Build) -> Result<(), SupervisorError> {
        let namespace = build.metadata.namespace.clone();
        self.create_if_not_exist(&namespace).await?;

        let mut user = self.get_user(&namespace);

        match build.status.phase.activity() {
            Activity::Active => {
                if user.active_build.status.phase != build.status.phase
                    || user.active_build.metadata.name != build.metadata.name
                {
                    user.active_build = build;
                    self.store_and_notify(&namespace, user.clone()).await;
                }
            }
            Activity::Done => {
                if user.done_build.status.phase != build.status.phase
                    || user.done_build.metadata.name != build.metadata.name
                {
                    user.done_build = build;
                    self.store_and_notify(&namespace, user.clone()).await;
                }
            }
            Activity::Other => {}
        }

        // The same name in both slots means the tracked active build just
        // reached a terminal phase; clear the active slot.
        if !user.active_build.metadata.name.is_empty()
            && user.active_build.metadata.name == user.done_build.metadata.name
        {
            info!(
                namespace = %namespace,
                build = %user.active_build.metadata.name,
                "Active and done builds are the same, cleaning active slot"
            );
            user.active_build = Build::default();
            self.store_and_notify(&namespace, user).await;
        }

        Ok(())
    }

    /// Process a deployment-config event for a tenant's Jenkins.
    ///
    /// Keeps `jenkins_last_update` fresh on two signals: a rollout in flight
    /// (new generation or unavailable replicas) stamps the current time, and
    /// an `Available=true` condition stamps the platform-reported instant.
    /// Both may fire in the same call.
    pub async fn handle_deployment_config(
        &self,
        dc: DeploymentConfig,
    ) -> Result<(), SupervisorError> {
        let Some(namespace) = user_namespace(&dc.metadata.namespace) else {
            return Err(SupervisorError::MalformedEvent(format!(
                "namespace {} lacks the jenkins suffix",
                dc.metadata.namespace
            )));
        };
        let namespace = namespace.to_string();

        let condition = dc.status.condition(AVAILABLE_CONDITION).ok_or_else(|| {
            SupervisorError::MalformedEvent(format!(
                "deployment config in {} has no {AVAILABLE_CONDITION} condition",
                dc.metadata.namespace
            ))
        })?;
        let available = parse_condition_status(&condition.status)?;

        self.create_if_not_exist(&namespace).await?;

        let mut user = self.get_user(&namespace);

        if (dc.metadata.generation != dc.status.observed_generation && dc.spec.replicas > 0)
            || dc.status.unavailable_replicas > 0
        {
            user.jenkins_last_update = Utc::now();
            self.store_and_notify(&namespace, user.clone()).await;
        }

        if available {
            if let Some(at) = condition.last_update_time {
                user.jenkins_last_update = at;
                self.store_and_notify(&namespace, user).await;
            }
        }

        Ok(())
    }

    /// Materialise the user record and its idler on first observation.
    async fn create_if_not_exist(&self, namespace: &str) -> Result<(), SupervisorError> {
        if self.users.contains_key(namespace) {
            return Ok(());
        }

        debug!(namespace, "Creating user");
        let cluster = self.platform.api_url().to_string();
        let info = self
            .tenant
            .tenant_by_namespace(&cluster, namespace)
            .await
            .map_err(SupervisorError::TenantRequest)?;

        let count = info.meta.total_count.max(info.data.len());
        if count > 1 {
            return Err(SupervisorError::TenantResolution {
                namespace: namespace.to_string(),
                count,
            });
        }
        let Some(data) = info.data.first() else {
            let detail = info
                .errors
                .iter()
                .map(|e| e.detail.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SupervisorError::TenantNotFound {
                cluster,
                namespace: namespace.to_string(),
                detail,
            });
        };

        let user = User::new(&data.id, namespace);

        // Concurrent first observations race to this entry; exactly one
        // constructs the idler.
        match self.channels.entry(namespace.to_string()) {
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(vacant) => {
                self.users.insert(namespace.to_string(), user.clone());
                let (tx, rx) = mpsc::channel(USER_CHANNEL_CAPACITY);
                vacant.insert(tx);

                let idler = UserIdler::new(
                    user,
                    Arc::clone(&self.platform),
                    Arc::clone(&self.toggles),
                    Arc::clone(&self.disabled_users),
                    self.credentials.clone(),
                    self.settings.clone(),
                );
                let _ = idler.spawn(rx, self.shutdown.subscribe());

                self.metrics.inc_tracked_users();
                debug!(namespace, "New user recorded");
                Ok(())
            }
        }
    }

    async fn store_and_notify(&self, namespace: &str, user: User) {
        self.users.insert(namespace.to_string(), user.clone());
        self.notify(namespace, user).await;
    }

    /// Deliver a snapshot to the namespace's idler, bounded by
    /// [`CHANNEL_SEND_TIMEOUT`]. On overrun the event is discarded; the
    /// idler's tick reconciles against the live platform regardless.
    async fn notify(&self, namespace: &str, user: User) {
        let Some(tx) = self.channels.get(namespace).map(|r| r.clone()) else {
            error!(namespace, "No channel found for sending user snapshot");
            return;
        };

        match tx.send_timeout(user, CHANNEL_SEND_TIMEOUT).await {
            Ok(()) => {}
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                warn!(namespace, "Unable to send user to idler channel, discarding event");
                self.metrics.inc_events_dropped();
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                warn!(namespace, "Idler channel closed, discarding event");
                self.metrics.inc_events_dropped();
            }
        }
    }
}

fn parse_condition_status(status: &str) -> Result<bool, SupervisorError> {
    match status.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(SupervisorError::MalformedEvent(format!(
            "condition status {other:?} is not a boolean"
        ))),
    }
}
