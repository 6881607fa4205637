//! Component health for liveness and readiness probes

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Component names tracked by the service.
pub mod components {
    pub const BUILD_WATCHER: &str = "build_watcher";
    pub const DC_WATCHER: &str = "dc_watcher";
    pub const TOGGLES: &str = "toggles";
    pub const API: &str = "api";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessReport {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Registry of component health, shared across tasks.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: Arc<DashMap<&'static str, ComponentHealth>>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, name: &'static str) {
        self.components.insert(
            name,
            ComponentHealth {
                status: ComponentStatus::Healthy,
                message: None,
            },
        );
    }

    pub fn set_degraded(&self, name: &'static str, message: impl Into<String>) {
        self.components.insert(
            name,
            ComponentHealth {
                status: ComponentStatus::Degraded,
                message: Some(message.into()),
            },
        );
    }

    pub fn set_unhealthy(&self, name: &'static str, message: impl Into<String>) {
        self.components.insert(
            name,
            ComponentHealth {
                status: ComponentStatus::Unhealthy,
                message: Some(message.into()),
            },
        );
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn report(&self) -> HealthReport {
        let components: std::collections::BTreeMap<String, ComponentHealth> = self
            .components
            .iter()
            .map(|r| (r.key().to_string(), r.value().clone()))
            .collect();

        let mut status = ComponentStatus::Healthy;
        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => {
                    status = ComponentStatus::Unhealthy;
                    break;
                }
                ComponentStatus::Degraded => status = ComponentStatus::Degraded,
                ComponentStatus::Healthy => {}
            }
        }

        HealthReport { status, components }
    }

    pub fn readiness(&self) -> ReadinessReport {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessReport {
                ready: false,
                reason: Some("not yet initialized".to_string()),
            };
        }
        if self.report().status == ComponentStatus::Unhealthy {
            return ReadinessReport {
                ready: false,
                reason: Some("critical component unhealthy".to_string()),
            };
        }
        ReadinessReport {
            ready: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status_prefers_worst() {
        let registry = HealthRegistry::new();
        registry.set_healthy(components::BUILD_WATCHER);
        registry.set_degraded(components::TOGGLES, "refresh failing");
        assert_eq!(registry.report().status, ComponentStatus::Degraded);

        registry.set_unhealthy(components::DC_WATCHER, "stream gone");
        assert_eq!(registry.report().status, ComponentStatus::Unhealthy);
    }

    #[test]
    fn test_readiness_gates() {
        let registry = HealthRegistry::new();
        assert!(!registry.readiness().ready);

        registry.set_ready(true);
        assert!(registry.readiness().ready);

        registry.set_unhealthy(components::API, "bind failed");
        assert!(!registry.readiness().ready);
    }
}
