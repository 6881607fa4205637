//! Disabled-user management

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};
use anyhow::Result;
use serde::Serialize;
use tabled::Tabled;

#[derive(Tabled, Serialize)]
struct UserRow {
    #[tabled(rename = "TENANT ID")]
    id: String,
}

/// List tenants with idling disabled.
pub async fn list_disabled(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response = client.disabled_users().await?;

    let rows: Vec<UserRow> = response
        .users
        .into_iter()
        .map(|id| UserRow { id })
        .collect();
    output::print_table(&rows, format);

    Ok(())
}

/// Disable automatic idling for the given tenants.
pub async fn disable(client: &ApiClient, ids: Vec<String>) -> Result<()> {
    let count = ids.len();
    client.set_user_status(ids, Vec::new()).await?;
    output::print_success(&format!("Disabled idling for {count} tenant(s)"));
    Ok(())
}

/// Re-enable automatic idling for the given tenants.
pub async fn enable(client: &ApiClient, ids: Vec<String>) -> Result<()> {
    let count = ids.len();
    client.set_user_status(Vec::new(), ids).await?;
    output::print_success(&format!("Enabled idling for {count} tenant(s)"));
    Ok(())
}
