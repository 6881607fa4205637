//! Forced idle, unidle and reset operations

use crate::client::ApiClient;
use crate::output;
use anyhow::Result;

pub async fn idle(client: &ApiClient, namespace: &str, cluster: &str) -> Result<()> {
    client.idle(namespace, cluster).await?;
    output::print_success(&format!("Idled Jenkins services in {namespace}"));
    Ok(())
}

pub async fn un_idle(client: &ApiClient, namespace: &str, cluster: &str) -> Result<()> {
    client.un_idle(namespace, cluster).await?;
    output::print_success(&format!("Unidled Jenkins services in {namespace}"));
    Ok(())
}

pub async fn reset(client: &ApiClient, namespace: &str, cluster: &str) -> Result<()> {
    client.reset(namespace, cluster).await?;
    output::print_success(&format!("Reset Jenkins pod in {namespace}"));
    Ok(())
}
