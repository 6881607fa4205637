use super::*;
use crate::models::{BuildPhase, BuildStatus, DcCondition, DcMeta, DcSpec, DcStatus, ObjectMeta, PodState};
use crate::tenant::{TenantData, TenantInfo, TenantMeta};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration};
use std::sync::Mutex;

struct MockPlatform;

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn idle(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn un_idle(&self, _: &str, _: &str, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn state(&self, _: &str, _: &str, _: &str, _: &str) -> Result<PodState> {
        Ok(PodState::Idled)
    }

    async fn reset(&self, _: &str, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    fn api_url(&self) -> &str {
        "https://api.test"
    }
}

struct MockToggles;

#[async_trait]
impl FeatureToggles for MockToggles {
    async fn is_idler_enabled(&self, _: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Tenant directory answering with one tenant per namespace by default.
struct MockTenant {
    matches: usize,
    lookups: Mutex<Vec<(String, String)>>,
}

impl MockTenant {
    fn new() -> Self {
        Self {
            matches: 1,
            lookups: Mutex::new(Vec::new()),
        }
    }

    fn with_matches(matches: usize) -> Self {
        Self {
            matches,
            lookups: Mutex::new(Vec::new()),
        }
    }

    fn lookups(&self) -> Vec<(String, String)> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl TenantService for MockTenant {
    async fn tenant_by_namespace(&self, cluster: &str, namespace: &str) -> Result<TenantInfo> {
        self.lookups
            .lock()
            .unwrap()
            .push((cluster.to_string(), namespace.to_string()));
        Ok(TenantInfo {
            meta: TenantMeta {
                total_count: self.matches,
            },
            data: (0..self.matches)
                .map(|i| TenantData {
                    id: format!("T-{namespace}-{i}"),
                })
                .collect(),
            errors: Vec::new(),
        })
    }

    async fn has_reached_max_capacity(&self, _: &str, _: &str) -> Result<bool> {
        Ok(false)
    }
}

fn supervisor(tenant: Arc<MockTenant>) -> Supervisor {
    let (shutdown, _) = broadcast::channel(1);
    Supervisor::new(
        Arc::new(MockPlatform),
        tenant,
        Arc::new(MockToggles),
        Arc::new(DisabledUsers::new()),
        ClusterCredentials {
            api_url: "https://api.test".into(),
            token: "secret".into(),
        },
        IdlerSettings::default(),
        shutdown,
    )
}

/// Pre-register a user and intercept its channel, bypassing materialisation.
fn seed(sup: &Supervisor, namespace: &str, id: &str) -> mpsc::Receiver<User> {
    let (tx, rx) = mpsc::channel(USER_CHANNEL_CAPACITY);
    sup.users
        .insert(namespace.to_string(), User::new(id, namespace));
    sup.channels.insert(namespace.to_string(), tx);
    rx
}

fn build(namespace: &str, name: &str, phase: BuildPhase) -> Build {
    Build {
        metadata: ObjectMeta {
            name: name.into(),
            namespace: namespace.into(),
        },
        status: BuildStatus { phase },
    }
}

fn dc(
    namespace: &str,
    generation: i64,
    observed: i64,
    replicas: i32,
    unavailable: i32,
    available: &str,
    at: Option<DateTime<Utc>>,
) -> DeploymentConfig {
    DeploymentConfig {
        metadata: DcMeta {
            name: "jenkins".into(),
            namespace: namespace.into(),
            generation,
        },
        spec: DcSpec { replicas },
        status: DcStatus {
            observed_generation: observed,
            unavailable_replicas: unavailable,
            conditions: vec![DcCondition {
                condition_type: "Available".into(),
                status: available.into(),
                last_update_time: at,
            }],
        },
    }
}

#[tokio::test]
async fn test_first_build_materializes_idler() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant.clone());

    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();

    assert_eq!(
        tenant.lookups(),
        vec![("https://api.test".to_string(), "alice".to_string())]
    );

    let user = sup.get_user("alice");
    assert_eq!(user.id, "T-alice-0");
    assert_eq!(user.namespace, "alice");
    assert_eq!(user.active_build.metadata.name, "b-1");
    assert!(sup.channels.contains_key("alice"));
}

#[tokio::test]
async fn test_known_namespace_skips_tenant_lookup() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant.clone());
    let _rx = seed(&sup, "alice", "T-alice");

    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();

    assert!(tenant.lookups().is_empty());
}

#[tokio::test]
async fn test_active_build_notification() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();

    let snapshot = rx.try_recv().unwrap();
    assert_eq!(snapshot.active_build.metadata.name, "b-1");
    assert_eq!(snapshot.active_build.status.phase, BuildPhase::Running);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_build_completion_resets_active_slot() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();
    let _ = rx.try_recv().unwrap();

    sup.handle_build(build("alice", "b-1", BuildPhase::Complete))
        .await
        .unwrap();

    // First notification carries the done update with the active slot still
    // pointing at the same build.
    let first = rx.try_recv().unwrap();
    assert_eq!(first.done_build.metadata.name, "b-1");
    assert_eq!(first.active_build.metadata.name, "b-1");

    // Second notification carries the reset sentinel.
    let second = rx.try_recv().unwrap();
    assert_eq!(second.active_build.metadata.name, "");
    assert_eq!(second.active_build.status.phase, BuildPhase::New);
    assert_eq!(second.done_build.metadata.name, "b-1");

    let stored = sup.get_user("alice");
    assert_eq!(stored.active_build.status.phase, BuildPhase::New);
}

#[tokio::test]
async fn test_duplicate_events_do_not_notify() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();
    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_duplicate_done_event_after_reset_is_noop() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();
    sup.handle_build(build("alice", "b-1", BuildPhase::Complete))
        .await
        .unwrap();
    while rx.try_recv().is_ok() {}

    let before = sup.get_user("alice");
    sup.handle_build(build("alice", "b-1", BuildPhase::Complete))
        .await
        .unwrap();

    assert!(rx.try_recv().is_err());
    assert_eq!(sup.get_user("alice"), before);
}

#[tokio::test]
async fn test_other_phase_promotes_nothing() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    sup.handle_build(build("alice", "b-1", BuildPhase::New))
        .await
        .unwrap();

    assert!(rx.try_recv().is_err());
    let user = sup.get_user("alice");
    assert_eq!(user.active_build.metadata.name, "");
    assert_eq!(user.done_build.metadata.name, "");
}

#[tokio::test]
async fn test_dc_rollout_in_progress_stamps_now() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    let t0 = Utc::now() - ChronoDuration::hours(2);
    sup.handle_deployment_config(dc("alice-jenkins", 5, 4, 1, 0, "False", Some(t0)))
        .await
        .unwrap();

    let snapshot = rx.try_recv().unwrap();
    let age = Utc::now().signed_duration_since(snapshot.jenkins_last_update);
    assert!(age < ChronoDuration::seconds(5));
    // The false condition must not fire a second update.
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dc_ready_stamps_condition_time() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    let t1 = Utc::now() - ChronoDuration::minutes(3);
    sup.handle_deployment_config(dc("alice-jenkins", 5, 5, 1, 0, "True", Some(t1)))
        .await
        .unwrap();

    let snapshot = rx.try_recv().unwrap();
    assert_eq!(snapshot.jenkins_last_update, t1);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dc_rollout_and_ready_both_fire() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    let t1 = Utc::now() - ChronoDuration::minutes(3);
    sup.handle_deployment_config(dc("alice-jenkins", 6, 5, 1, 1, "True", Some(t1)))
        .await
        .unwrap();

    let first = rx.try_recv().unwrap();
    assert!(first.jenkins_last_update > t1);
    let second = rx.try_recv().unwrap();
    assert_eq!(second.jenkins_last_update, t1);
    assert_eq!(sup.get_user("alice").jenkins_last_update, t1);
}

#[tokio::test]
async fn test_dc_without_available_condition_is_rejected() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");
    let before = sup.get_user("alice");

    let mut event = dc("alice-jenkins", 5, 4, 1, 0, "True", None);
    event.status.conditions.clear();

    let err = sup.handle_deployment_config(event).await.unwrap_err();
    assert!(matches!(err, SupervisorError::MalformedEvent(_)));
    assert!(rx.try_recv().is_err());
    assert_eq!(sup.get_user("alice"), before);
}

#[tokio::test]
async fn test_dc_with_unparseable_status_is_rejected() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);
    let mut rx = seed(&sup, "alice", "T-alice");

    let err = sup
        .handle_deployment_config(dc("alice-jenkins", 5, 4, 1, 0, "maybe", None))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::MalformedEvent(_)));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_dc_without_jenkins_suffix_is_rejected() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant.clone());

    let err = sup
        .handle_deployment_config(dc("alice", 5, 4, 1, 0, "True", None))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::MalformedEvent(_)));
    assert!(tenant.lookups().is_empty());
}

#[tokio::test]
async fn test_multiple_tenant_matches_refuse_creation() {
    let tenant = Arc::new(MockTenant::with_matches(2));
    let sup = supervisor(tenant);

    let err = sup
        .handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::TenantResolution { .. }));
    assert!(sup.users.is_empty());
    assert!(sup.channels.is_empty());
}

#[tokio::test]
async fn test_zero_tenant_matches_refuse_creation() {
    let tenant = Arc::new(MockTenant::with_matches(0));
    let sup = supervisor(tenant);

    let err = sup
        .handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::TenantNotFound { .. }));
    assert!(sup.users.is_empty());
}

#[tokio::test]
async fn test_get_user_for_unknown_namespace_is_zero_value() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);

    let user = sup.get_user("nobody");
    assert!(user.id.is_empty());
    assert!(user.namespace.is_empty());
}

#[tokio::test]
async fn test_concurrent_first_observation_creates_one_idler() {
    let tenant = Arc::new(MockTenant::new());
    let sup = Arc::new(supervisor(tenant));

    let a = {
        let sup = Arc::clone(&sup);
        tokio::spawn(
            async move { sup.handle_build(build("alice", "b-1", BuildPhase::Running)).await },
        )
    };
    let b = {
        let sup = Arc::clone(&sup);
        tokio::spawn(
            async move { sup.handle_build(build("alice", "b-2", BuildPhase::Pending)).await },
        )
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert_eq!(sup.channels.len(), 1);
    assert_eq!(sup.users.len(), 1);
}

#[tokio::test]
async fn test_notify_overrun_drops_event() {
    let tenant = Arc::new(MockTenant::new());
    let sup = supervisor(tenant);

    // Single-slot channel with nobody draining it.
    let (tx, mut rx) = mpsc::channel(1);
    sup.users.insert("alice".into(), User::new("T-alice", "alice"));
    sup.channels.insert("alice".into(), tx.clone());
    tx.send(User::default()).await.unwrap();

    let started = std::time::Instant::now();
    sup.handle_build(build("alice", "b-1", BuildPhase::Running))
        .await
        .unwrap();
    assert!(started.elapsed() >= CHANNEL_SEND_TIMEOUT);

    // Only the pre-filled message is in the channel; the event was dropped,
    // but the store still happened before the send attempt.
    let first = rx.try_recv().unwrap();
    assert_eq!(first.namespace, "");
    assert!(rx.try_recv().is_err());
    assert_eq!(sup.get_user("alice").active_build.metadata.name, "b-1");
}
