//! Core data model for the Jenkins idler

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use serde::{Deserialize, Serialize};

/// Suffix distinguishing a user's Jenkins namespace from the user namespace.
pub const JENKINS_NAMESPACE_SUFFIX: &str = "-jenkins";

/// Services idled and unidled together for one tenant.
pub const JENKINS_SERVICES: &[&str] = &["jenkins", "content-repository"];

/// Append the Jenkins suffix to a user namespace.
pub fn jenkins_namespace(user_namespace: &str) -> String {
    format!("{user_namespace}{JENKINS_NAMESPACE_SUFFIX}")
}

/// Strip the Jenkins suffix from a deployment-config namespace.
///
/// Returns `None` when the suffix is absent; such events do not belong to a
/// tenant Jenkins and are rejected upstream.
pub fn user_namespace(dc_namespace: &str) -> Option<&str> {
    dc_namespace.strip_suffix(JENKINS_NAMESPACE_SUFFIX)
}

/// Build phases reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    #[default]
    New,
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
    Error,
    #[serde(other)]
    Unknown,
}

/// Classification of a build phase for idling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// Build in progress; Jenkins must stay up.
    Active,
    /// Build reached a terminal phase.
    Done,
    /// Neither; does not promote to the active or done slot.
    Other,
}

impl BuildPhase {
    pub fn activity(&self) -> Activity {
        match self {
            BuildPhase::Pending | BuildPhase::Running => Activity::Active,
            BuildPhase::Complete | BuildPhase::Failed | BuildPhase::Cancelled | BuildPhase::Error => {
                Activity::Done
            }
            BuildPhase::New | BuildPhase::Unknown => Activity::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    #[serde(default)]
    pub phase: BuildPhase,
}

/// A build observed in a user namespace. The name (space + build number) is
/// unique per build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: BuildStatus,
}

/// Deployment config for a tenant's Jenkins, as decoded from the platform
/// watch stream. Namespace carries the Jenkins suffix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    #[serde(default)]
    pub metadata: DcMeta,
    #[serde(default)]
    pub spec: DcSpec,
    #[serde(default)]
    pub status: DcStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub generation: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcSpec {
    #[serde(default)]
    pub replicas: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub unavailable_replicas: i32,
    #[serde(default)]
    pub conditions: Vec<DcCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DcCondition {
    #[serde(rename = "type", default)]
    pub condition_type: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl DcStatus {
    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&DcCondition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }
}

/// Per-namespace user record: the supervisor's view of one tenant.
///
/// Created on first observation of the namespace and never destroyed while
/// the process runs. Snapshots flow by value into the idler's channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub namespace: String,
    pub active_build: Build,
    pub done_build: Build,
    pub jenkins_last_update: DateTime<Utc>,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: String::new(),
            namespace: String::new(),
            active_build: Build::default(),
            done_build: Build::default(),
            jenkins_last_update: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl User {
    pub fn new(id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// True when the tracked active build is in an in-progress phase.
    pub fn has_active_build(&self) -> bool {
        self.active_build.status.phase.activity() == Activity::Active
    }
}

/// Observed state of a tenant's Jenkins pod.
///
/// Totally ordered; everything below `Running` counts as idle.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PodState {
    #[default]
    Unknown,
    Idled,
    Starting,
    Running,
    Stopping,
}

impl PodState {
    pub fn is_idle(&self) -> bool {
        *self < PodState::Running
    }
}

impl std::fmt::Display for PodState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PodState::Unknown => "unknown",
            PodState::Idled => "idled",
            PodState::Starting => "starting",
            PodState::Running => "running",
            PodState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Tenant ids for which automatic idling is suppressed.
///
/// Mutated by the control plane, read by every idler on every evaluation.
/// Intentionally process-local; there is no durable store behind it.
#[derive(Debug, Default)]
pub struct DisabledUsers {
    ids: DashSet<String>,
}

impl DisabledUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            self.ids.insert(id.into());
        }
    }

    pub fn remove<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for id in ids {
            self.ids.remove(id.as_ref());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.ids.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }
}
