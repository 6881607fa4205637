//! Service configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

/// Idler configuration, loaded from `IDLER_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct IdlerConfig {
    /// Port for the control-plane API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Idler reconciliation tick in minutes
    #[serde(default = "default_check_interval_mins")]
    pub check_interval_mins: u64,

    /// Post-deployment grace period in minutes before re-idling
    #[serde(default = "default_quiet_window_mins")]
    pub quiet_window_mins: u64,

    /// Cap on consecutive idle/unidle attempts per direction
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// API URL of the cluster this instance watches
    #[serde(default)]
    pub platform_api_url: String,

    /// Bearer token for the watched cluster
    #[serde(default)]
    pub platform_token: String,

    /// Tenant directory base URL
    #[serde(default = "default_tenant_service_url")]
    pub tenant_service_url: String,

    /// Service-to-service token for the tenant directory
    #[serde(default)]
    pub tenant_service_token: String,

    /// Toggle service base URL
    #[serde(default = "default_toggle_service_url")]
    pub toggle_service_url: String,

    /// Path to the cluster view JSON file
    #[serde(default = "default_cluster_config_path")]
    pub cluster_config_path: String,
}

fn default_api_port() -> u16 {
    8080
}

fn default_check_interval_mins() -> u64 {
    15
}

fn default_quiet_window_mins() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    5
}

fn default_tenant_service_url() -> String {
    "http://tenant-service:8080".to_string()
}

fn default_toggle_service_url() -> String {
    "http://toggle-service:4242".to_string()
}

fn default_cluster_config_path() -> String {
    "/etc/idler/clusters.json".to_string()
}

impl IdlerConfig {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("IDLER"))
            .build()
            .context("failed to read configuration")?;

        let config: IdlerConfig = config
            .try_deserialize()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.check_interval_mins == 0 {
            anyhow::bail!("check interval must be a positive number of minutes");
        }
        if self.platform_api_url.is_empty() {
            anyhow::bail!("IDLER_PLATFORM_API_URL must be set");
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_mins * 60)
    }

    pub fn quiet_window(&self) -> Duration {
        Duration::from_secs(self.quiet_window_mins * 60)
    }

    /// Idler tuning derived from this configuration.
    pub fn idler_settings(&self) -> idler_lib::idler::IdlerSettings {
        idler_lib::idler::IdlerSettings {
            check_interval: self.check_interval(),
            quiet_window: self.quiet_window(),
            max_retries: self.max_retries,
            ..idler_lib::idler::IdlerSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> IdlerConfig {
        IdlerConfig {
            api_port: default_api_port(),
            check_interval_mins: default_check_interval_mins(),
            quiet_window_mins: default_quiet_window_mins(),
            max_retries: default_max_retries(),
            platform_api_url: "https://api.test".into(),
            platform_token: "secret".into(),
            tenant_service_url: default_tenant_service_url(),
            tenant_service_token: String::new(),
            toggle_service_url: default_toggle_service_url(),
            cluster_config_path: default_cluster_config_path(),
        }
    }

    #[test]
    fn test_durations_from_minutes() {
        let config = base();
        assert_eq!(config.check_interval(), Duration::from_secs(15 * 60));
        assert_eq!(config.quiet_window(), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_zero_check_interval_rejected() {
        let mut config = base();
        config.check_interval_mins = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_platform_url_rejected() {
        let mut config = base();
        config.platform_api_url.clear();
        assert!(config.validate().is_err());
    }
}
