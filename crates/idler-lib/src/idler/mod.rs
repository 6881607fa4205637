//! Per-user idler state machine
//!
//! One idler task per tenant namespace. The task consumes user snapshots
//! from its bounded input channel, reconciles on a periodic tick, and drives
//! the platform towards the state the idle policy demands.


use crate::cluster::ClusterCredentials;
use crate::models::{jenkins_namespace, DisabledUsers, PodState, User, JENKINS_SERVICES};
use crate::observability::IdlerMetrics;
use crate::platform::PlatformClient;
use crate::toggles::FeatureToggles;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant};
use tracing::{debug, warn};

/// Capacity of each idler's snapshot channel.
pub const USER_CHANNEL_CAPACITY: usize = 10;

/// Tuning knobs shared by every idler, derived from configuration.
#[derive(Debug, Clone)]
pub struct IdlerSettings {
    /// Reconciliation tick.
    pub check_interval: Duration,
    /// Grace period after a deployment update during which Jenkins stays up.
    pub quiet_window: Duration,
    /// Minimum dwell before the same transition may be reissued.
    pub min_dwell: Duration,
    /// Cap on consecutive attempts per transition direction.
    pub max_retries: u32,
}

impl Default for IdlerSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(15 * 60),
            quiet_window: Duration::from_secs(30 * 60),
            min_dwell: Duration::from_secs(30),
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleAction {
    Idle,
    UnIdle,
}

impl IdleAction {
    fn operation(&self) -> &'static str {
        match self {
            IdleAction::Idle => "Idle",
            IdleAction::UnIdle => "UnIdle",
        }
    }
}

/// State machine owning the idle/unidle decision for one namespace.
pub struct UserIdler {
    user: User,
    jenkins_ns: String,
    pod_state: PodState,
    last_action: Option<IdleAction>,
    last_action_at: Option<Instant>,
    idle_attempts: u32,
    unidle_attempts: u32,
    platform: Arc<dyn PlatformClient>,
    toggles: Arc<dyn FeatureToggles>,
    disabled_users: Arc<DisabledUsers>,
    credentials: ClusterCredentials,
    settings: IdlerSettings,
    metrics: IdlerMetrics,
}

impl UserIdler {
    pub fn new(
        user: User,
        platform: Arc<dyn PlatformClient>,
        toggles: Arc<dyn FeatureToggles>,
        disabled_users: Arc<DisabledUsers>,
        credentials: ClusterCredentials,
        settings: IdlerSettings,
    ) -> Self {
        let jenkins_ns = jenkins_namespace(&user.namespace);
        Self {
            user,
            jenkins_ns,
            pod_state: PodState::Unknown,
            last_action: None,
            last_action_at: None,
            idle_attempts: 0,
            unidle_attempts: 0,
            platform,
            toggles,
            disabled_users,
            credentials,
            settings,
            metrics: IdlerMetrics::new(),
        }
    }

    /// Start the idler task.
    pub fn spawn(
        self,
        rx: mpsc::Receiver<User>,
        shutdown: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(rx, shutdown))
    }

    async fn run(
        mut self,
        mut rx: mpsc::Receiver<User>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        debug!(namespace = %self.user.namespace, "Starting user idler");
        let mut ticker = interval(self.settings.check_interval);

        loop {
            tokio::select! {
                snapshot = rx.recv() => match snapshot {
                    Some(user) => {
                        self.user = user;
                        self.evaluate().await;
                    }
                    None => {
                        debug!(namespace = %self.user.namespace, "Input channel closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.evaluate().await;
                }
                _ = shutdown.recv() => {
                    debug!(namespace = %self.user.namespace, "Shutting down user idler");
                    break;
                }
            }
        }
    }

    /// One evaluation pass: gate, observe, decide, act.
    async fn evaluate(&mut self) {
        let enabled = match self.toggles.is_idler_enabled(&self.user.id).await {
            Ok(enabled) => enabled,
            Err(e) => {
                // Fail open: an unreachable toggle service never parks idling.
                warn!(namespace = %self.user.namespace, error = %e, "Toggle check failed");
                true
            }
        };
        let suppressed = !enabled || self.disabled_users.contains(&self.user.id);

        let Some(state) = self.read_state().await else {
            return;
        };

        if suppressed {
            debug!(
                namespace = %self.user.namespace,
                state = %state,
                "Idling suppressed for user, pod state reconciled only"
            );
            return;
        }

        let should_run = self.should_run(Utc::now());
        match (should_run, state) {
            (true, PodState::Unknown | PodState::Idled) => {
                self.transition(IdleAction::UnIdle).await;
            }
            (false, PodState::Starting | PodState::Running) => {
                self.transition(IdleAction::Idle).await;
            }
            _ => {
                // Observation matches the target (or the pod is settling);
                // a confirming read releases the retry budget.
                if should_run && state == PodState::Running {
                    self.unidle_attempts = 0;
                }
                if !should_run && state == PodState::Idled {
                    self.idle_attempts = 0;
                }
            }
        }
    }

    /// Read and record the current pod state.
    ///
    /// A failed read is a transient platform error; the next tick retries.
    async fn read_state(&mut self) -> Option<PodState> {
        match self
            .platform
            .state(
                &self.credentials.api_url,
                &self.credentials.token,
                &self.jenkins_ns,
                "jenkins",
            )
            .await
        {
            Ok(state) => {
                if state != self.pod_state {
                    debug!(
                        namespace = %self.user.namespace,
                        from = %self.pod_state,
                        to = %state,
                        "Observed pod state change"
                    );
                }
                self.pod_state = state;
                Some(state)
            }
            Err(e) => {
                warn!(namespace = %self.user.namespace, error = %e, "Failed to read pod state");
                None
            }
        }
    }

    /// Idle policy: Jenkins must run while a build is active or a deployment
    /// update is within the quiet window.
    fn should_run(&self, now: DateTime<Utc>) -> bool {
        if self.user.has_active_build() {
            return true;
        }
        let quiet =
            ChronoDuration::from_std(self.settings.quiet_window).unwrap_or(ChronoDuration::MAX);
        now.signed_duration_since(self.user.jenkins_last_update) < quiet
    }

    async fn transition(&mut self, action: IdleAction) {
        // Do not reissue the same transition within the dwell window; the
        // platform has not had time to act on the previous one.
        if self.last_action == Some(action) {
            if let Some(at) = self.last_action_at {
                if at.elapsed() < self.settings.min_dwell {
                    debug!(
                        namespace = %self.user.namespace,
                        operation = action.operation(),
                        "Transition within dwell window, skipping"
                    );
                    return;
                }
            }
        }

        let attempts = match action {
            IdleAction::Idle => &mut self.idle_attempts,
            IdleAction::UnIdle => &mut self.unidle_attempts,
        };
        if *attempts >= self.settings.max_retries {
            debug!(
                namespace = %self.user.namespace,
                operation = action.operation(),
                attempts = *attempts,
                "Retry budget exhausted, waiting for a confirming read"
            );
            return;
        }
        *attempts += 1;

        for service in JENKINS_SERVICES {
            let result = match action {
                IdleAction::Idle => {
                    self.platform
                        .idle(
                            &self.credentials.api_url,
                            &self.credentials.token,
                            &self.jenkins_ns,
                            service,
                        )
                        .await
                }
                IdleAction::UnIdle => {
                    self.platform
                        .un_idle(
                            &self.credentials.api_url,
                            &self.credentials.token,
                            &self.jenkins_ns,
                            service,
                        )
                        .await
                }
            };

            match result {
                Ok(()) => {
                    debug!(
                        namespace = %self.user.namespace,
                        service,
                        operation = action.operation(),
                        "Transition issued"
                    );
                    self.metrics.inc_transition(action.operation(), "ok");
                }
                Err(e) => {
                    warn!(
                        namespace = %self.user.namespace,
                        service,
                        operation = action.operation(),
                        error = %e,
                        "Transition failed, will retry on next tick"
                    );
                    self.metrics.inc_transition(action.operation(), "error");
                }
            }
        }

        self.last_action = Some(action);
        self.last_action_at = Some(Instant::now());

        // An opposite transition opens a fresh retry budget for its inverse.
        match action {
            IdleAction::Idle => self.unidle_attempts = 0,
            IdleAction::UnIdle => self.idle_attempts = 0,
        }
    }
}
