//! Platform watch streams
//!
//! Connects to the cluster's streaming watch endpoints for builds and
//! deployment configs, decodes line-delimited JSON watch events, and
//! dispatches them into the supervisor. A dropped stream reconnects with
//! exponential backoff; an undecodable or unresolvable event is logged and
//! skipped, never ending the stream.

use crate::cluster::ClusterCredentials;
use crate::health::HealthRegistry;
use crate::models::{Build, DeploymentConfig};
use crate::observability::IdlerMetrics;
use crate::supervisor::Supervisor;
use anyhow::{Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Which platform object stream a watcher follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Builds,
    DeploymentConfigs,
}

impl WatchKind {
    fn path(&self) -> &'static str {
        match self {
            WatchKind::Builds => "builds",
            WatchKind::DeploymentConfigs => "deploymentconfigs",
        }
    }

    /// Health component owned by this watcher.
    pub fn component(&self) -> &'static str {
        match self {
            WatchKind::Builds => crate::health::components::BUILD_WATCHER,
            WatchKind::DeploymentConfigs => crate::health::components::DC_WATCHER,
        }
    }
}

/// One decoded entry of a watch stream.
#[derive(Debug, Deserialize)]
pub struct WatchEvent<T> {
    #[serde(rename = "type")]
    pub event_type: String,
    pub object: T,
}

/// Accumulates stream chunks and yields complete lines.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: String,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }
}

/// Long-lived watcher for one stream of one cluster.
pub struct PlatformWatcher {
    client: reqwest::Client,
    credentials: ClusterCredentials,
    supervisor: Arc<Supervisor>,
    health: HealthRegistry,
    metrics: IdlerMetrics,
}

impl PlatformWatcher {
    pub fn new(
        credentials: ClusterCredentials,
        supervisor: Arc<Supervisor>,
        health: HealthRegistry,
    ) -> Result<Self> {
        // No overall timeout: the watch response body is open-ended.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to create watch HTTP client")?;
        Ok(Self {
            client,
            credentials,
            supervisor,
            health,
            metrics: IdlerMetrics::new(),
        })
    }

    /// Start the watcher task for the given stream.
    pub fn spawn(
        self,
        kind: WatchKind,
        shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(kind, shutdown))
    }

    async fn run(self, kind: WatchKind, mut shutdown: broadcast::Receiver<()>) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(stream = kind.path(), "Stopping platform watcher");
                    return;
                }
                result = self.watch_once(kind) => {
                    match result {
                        Ok(()) => {
                            info!(stream = kind.path(), "Watch stream ended, reconnecting");
                            backoff = INITIAL_BACKOFF;
                        }
                        Err(e) => {
                            warn!(
                                stream = kind.path(),
                                error = %e,
                                backoff_secs = backoff.as_secs(),
                                "Watch stream failed"
                            );
                            self.health
                                .set_degraded(kind.component(), format!("reconnecting: {e}"));
                        }
                    }
                    self.metrics.inc_watch_reconnects();
                }
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!(stream = kind.path(), "Stopping platform watcher");
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Open the stream and dispatch events until it ends.
    async fn watch_once(&self, kind: WatchKind) -> Result<()> {
        let url = format!(
            "{}/oapi/v1/watch/{}",
            self.credentials.api_url.trim_end_matches('/'),
            kind.path()
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credentials.token)
            .send()
            .await
            .context("failed to open watch stream")?
            .error_for_status()
            .context("watch request rejected")?;

        info!(stream = kind.path(), "Watch stream established");
        self.health.set_healthy(kind.component());

        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("watch stream read failed")?;
            for line in lines.push(&chunk) {
                self.dispatch(kind, &line).await;
            }
        }

        Ok(())
    }

    async fn dispatch(&self, kind: WatchKind, line: &str) {
        match kind {
            WatchKind::Builds => match serde_json::from_str::<WatchEvent<Build>>(line) {
                Ok(event) => {
                    debug!(event_type = %event.event_type, "Build event");
                    if let Err(e) = self.supervisor.handle_build(event.object).await {
                        warn!(error = %e, "Dropping build event");
                    }
                }
                Err(e) => warn!(error = %e, "Undecodable build event"),
            },
            WatchKind::DeploymentConfigs => {
                match serde_json::from_str::<WatchEvent<DeploymentConfig>>(line) {
                    Ok(event) => {
                        debug!(event_type = %event.event_type, "Deployment config event");
                        if let Err(e) = self.supervisor.handle_deployment_config(event.object).await
                        {
                            warn!(error = %e, "Dropping deployment config event");
                        }
                    }
                    Err(e) => warn!(error = %e, "Undecodable deployment config event"),
                }
            }
        }
    }
}
