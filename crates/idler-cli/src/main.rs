//! Jenkins Idler CLI
//!
//! A command-line tool for querying Jenkins state, forcing idle/unidle
//! operations, and managing disabled tenants.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{control, status, users};

/// Jenkins Idler CLI
#[derive(Parser)]
#[command(name = "idlerctl")]
#[command(author, version, about = "CLI for the Jenkins idler control plane", long_about = None)]
pub struct Cli {
    /// Idler API endpoint URL (can also be set via IDLER_API_URL env var)
    #[arg(long, env = "IDLER_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Target cluster API URL (can also be set via IDLER_CLUSTER_URL env var)
    #[arg(long, env = "IDLER_CLUSTER_URL")]
    pub cluster: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show Jenkins state for a namespace
    Status {
        /// Jenkins namespace (e.g. alice-jenkins)
        namespace: String,
    },

    /// Force-idle the Jenkins services in a namespace
    Idle {
        /// Jenkins namespace
        namespace: String,
    },

    /// Unidle the Jenkins services in a namespace
    Unidle {
        /// Jenkins namespace
        namespace: String,
    },

    /// Delete the Jenkins pod so the platform recreates it
    Reset {
        /// Jenkins namespace
        namespace: String,
    },

    /// List the clusters in the idler's view
    Clusters,

    /// Manage tenants excluded from automatic idling
    #[command(subcommand)]
    Users(UserCommands),
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// List tenants with idling disabled
    List,

    /// Disable automatic idling for tenants
    Disable {
        /// Tenant ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Re-enable automatic idling for tenants
    Enable {
        /// Tenant ids
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn require_cluster(cluster: Option<String>) -> Result<String> {
    cluster.ok_or_else(|| {
        anyhow::anyhow!("a target cluster is required; pass --cluster or set IDLER_CLUSTER_URL")
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Status { namespace } => {
            let cluster = require_cluster(cli.cluster)?;
            status::show_status(&client, &namespace, &cluster, cli.format).await?;
        }
        Commands::Idle { namespace } => {
            let cluster = require_cluster(cli.cluster)?;
            control::idle(&client, &namespace, &cluster).await?;
        }
        Commands::Unidle { namespace } => {
            let cluster = require_cluster(cli.cluster)?;
            control::un_idle(&client, &namespace, &cluster).await?;
        }
        Commands::Reset { namespace } => {
            let cluster = require_cluster(cli.cluster)?;
            control::reset(&client, &namespace, &cluster).await?;
        }
        Commands::Clusters => {
            status::show_clusters(&client, cli.format).await?;
        }
        Commands::Users(user_cmd) => match user_cmd {
            UserCommands::List => {
                users::list_disabled(&client, cli.format).await?;
            }
            UserCommands::Disable { ids } => {
                users::disable(&client, ids).await?;
            }
            UserCommands::Enable { ids } => {
                users::enable(&client, ids).await?;
            }
        },
    }

    Ok(())
}
