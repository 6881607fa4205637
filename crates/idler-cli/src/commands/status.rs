//! Status and cluster view queries

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct StatusRow {
    #[tabled(rename = "NAMESPACE")]
    namespace: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "IDLE")]
    idle: String,
}

/// Show the Jenkins state for a namespace.
pub async fn show_status(
    client: &ApiClient,
    namespace: &str,
    cluster: &str,
    format: OutputFormat,
) -> Result<()> {
    let status = client.status(namespace, cluster).await?;

    for error in &status.errors {
        output::print_error(&format!("[{}] {}", error.code, error.description));
    }

    if let Some(info) = status.data {
        let is_idle = client.is_idle(namespace, cluster).await?;
        let rows = vec![StatusRow {
            namespace: namespace.to_string(),
            state: output::color_state(&info.state),
            idle: is_idle.is_idle.to_string(),
        }];
        output::print_table(&rows, format);
    }

    Ok(())
}

#[derive(Tabled, Serialize)]
struct ClusterRow {
    #[tabled(rename = "API URL")]
    api_url: String,
    #[tabled(rename = "APP DNS")]
    app_dns: String,
}

/// List the clusters in the idler's view.
pub async fn show_clusters(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let clusters = client.cluster_view().await?;

    let rows: Vec<ClusterRow> = clusters
        .into_iter()
        .map(|c| ClusterRow {
            api_url: c.api_url,
            app_dns: c.app_dns,
        })
        .collect();
    output::print_table(&rows, format);

    Ok(())
}
