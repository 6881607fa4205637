//! Jenkins idler
//!
//! Watches build activity and deployment rollouts for every tenant
//! namespace, decides per tenant whether Jenkins should be running or
//! idled, and drives the platform accordingly. The control-plane API
//! exposes forced operations and status queries.

use anyhow::Result;
use idler::{api, config::IdlerConfig};
use idler_lib::cluster::{ClusterCredentials, ClusterView};
use idler_lib::health::{components, HealthRegistry};
use idler_lib::models::DisabledUsers;
use idler_lib::observability::IdlerMetrics;
use idler_lib::platform::{OpenShiftClient, PlatformClient};
use idler_lib::supervisor::Supervisor;
use idler_lib::tenant::{TenantClient, TenantService};
use idler_lib::toggles::{FeatureToggles, ToggleClient};
use idler_lib::watch::{PlatformWatcher, WatchKind};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const IDLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = IDLER_VERSION, "Starting jenkins-idler");

    let config = IdlerConfig::load()?;
    info!(cluster = %config.platform_api_url, "Idler configured");

    let cluster_view = ClusterView::load(&config.cluster_config_path)?;

    let health = HealthRegistry::new();
    let metrics = IdlerMetrics::new();

    let platform: Arc<dyn PlatformClient> =
        Arc::new(OpenShiftClient::new(&config.platform_api_url)?);
    let tenant: Arc<dyn TenantService> = Arc::new(TenantClient::new(
        &config.tenant_service_url,
        &config.tenant_service_token,
    )?);

    // Startup blocks on the toggle service; idling without a functioning
    // kill switch is worse than not starting.
    let toggles: Arc<dyn FeatureToggles> =
        Arc::new(ToggleClient::connect(&config.toggle_service_url).await?);
    health.set_healthy(components::TOGGLES);

    let disabled_users = Arc::new(DisabledUsers::new());
    let credentials = ClusterCredentials {
        api_url: config.platform_api_url.clone(),
        token: config.platform_token.clone(),
    };

    let (shutdown_tx, _) = broadcast::channel(1);

    let supervisor = Arc::new(Supervisor::new(
        Arc::clone(&platform),
        Arc::clone(&tenant),
        toggles,
        Arc::clone(&disabled_users),
        credentials.clone(),
        config.idler_settings(),
        shutdown_tx.clone(),
    ));

    let _build_watch = PlatformWatcher::new(credentials.clone(), Arc::clone(&supervisor), health.clone())?
        .spawn(WatchKind::Builds, shutdown_tx.subscribe());
    let _dc_watch = PlatformWatcher::new(credentials, Arc::clone(&supervisor), health.clone())?
        .spawn(WatchKind::DeploymentConfigs, shutdown_tx.subscribe());

    let state = Arc::new(api::AppState {
        platform,
        tenant,
        cluster_view,
        disabled_users,
        health: health.clone(),
        metrics,
    });
    let api_handle = tokio::spawn(api::serve(config.api_port, state));
    health.set_healthy(components::API);
    health.set_ready(true);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());
    api_handle.abort();

    Ok(())
}
