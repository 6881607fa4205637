//! Cluster view: the set of platform clusters this idler can act on
//!
//! Maps a cluster API URL to the bearer token used for platform calls.
//! Loaded once at startup from a JSON file; the control plane rejects
//! requests naming a cluster outside the view.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Credentials for the cluster this instance watches and reconciles.
#[derive(Debug, Clone)]
pub struct ClusterCredentials {
    pub api_url: String,
    pub token: String,
}

/// One entry of the cluster view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub api_url: String,
    #[serde(default)]
    pub app_dns: String,
    pub token: String,
}

/// Token-free projection of an entry, safe to expose over the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDns {
    pub api_url: String,
    pub app_dns: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    clusters: Vec<ClusterEntry>,
}

impl ClusterView {
    pub fn new(clusters: Vec<ClusterEntry>) -> Self {
        Self { clusters }
    }

    /// Load the view from a JSON file containing an array of entries.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster view from {}", path.display()))?;
        let clusters: Vec<ClusterEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("malformed cluster view in {}", path.display()))?;
        Ok(Self { clusters })
    }

    /// Resolve the bearer token for a cluster API URL.
    ///
    /// URLs are compared with trailing slashes stripped so that
    /// `https://c1/` and `https://c1` name the same cluster.
    pub fn token_for(&self, api_url: &str) -> Option<&str> {
        let wanted = api_url.trim_end_matches('/');
        self.clusters
            .iter()
            .find(|c| c.api_url.trim_end_matches('/') == wanted)
            .map(|c| c.token.as_str())
    }

    /// Token-free view for `GET /cluster`.
    pub fn dns_view(&self) -> Vec<ClusterDns> {
        self.clusters
            .iter()
            .map(|c| ClusterDns {
                api_url: c.api_url.clone(),
                app_dns: c.app_dns.clone(),
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> ClusterView {
        ClusterView::new(vec![
            ClusterEntry {
                api_url: "https://api.c1.example.com".into(),
                app_dns: "apps.c1.example.com".into(),
                token: "token-one".into(),
            },
            ClusterEntry {
                api_url: "https://api.c2.example.com/".into(),
                app_dns: "apps.c2.example.com".into(),
                token: "token-two".into(),
            },
        ])
    }

    #[test]
    fn test_token_lookup_normalizes_trailing_slash() {
        let view = view();
        assert_eq!(view.token_for("https://api.c1.example.com/"), Some("token-one"));
        assert_eq!(view.token_for("https://api.c2.example.com"), Some("token-two"));
        assert_eq!(view.token_for("https://api.unknown.example.com"), None);
    }

    #[test]
    fn test_dns_view_carries_no_tokens() {
        let dns = view().dns_view();
        assert_eq!(dns.len(), 2);
        let json = serde_json::to_string(&dns).unwrap();
        assert!(!json.contains("token-one"));
    }
}
