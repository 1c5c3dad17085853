//! Per-backend health tracking and disablement.
//!
//! Each backend has its own failure counter and backoff schedule. A
//! failed call temporarily disables the backend for a period that grows
//! with consecutive failures; a successful call resets everything.
//! Authentication failures disable permanently, since they never heal
//! without operator action.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::webaccess::WebAccessError;

use super::{AccessEvent, AccessKind, AccessResult, BackendConfig, BackendState, ConfigStore};

/// Backoff schedule in minutes, indexed by consecutive-failure count and
/// clamped at the last entry.
pub const DISABLE_PERIODS: [i64; 8] = [0, 15, 30, 60, 180, 360, 720, 1440];

/// How many access events are kept per backend.
const ACCESS_HISTORY_SIZE: usize = 100;

/// Backoff duration for a given disablement level. Pure clamped lookup.
pub fn backoff_minutes(level: u32) -> i64 {
    DISABLE_PERIODS[(level as usize).min(DISABLE_PERIODS.len() - 1)]
}

struct BackendHandle {
    config: BackendConfig,
    history: VecDeque<AccessEvent>,
}

impl BackendHandle {
    fn record(&mut self, kind: AccessKind, result: AccessResult, response_time_ms: Option<u64>) {
        if self.history.len() == ACCESS_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history.push_back(AccessEvent {
            kind,
            result,
            response_time_ms,
            time: Utc::now(),
        });
    }
}

/// Tracks health for all configured backends.
///
/// State transitions for one backend are linearizable: every mutation
/// runs under that backend's own lock, never a lock shared across
/// backends.
pub struct HealthController {
    backends: HashMap<String, Arc<Mutex<BackendHandle>>>,
    config_store: Arc<dyn ConfigStore>,
    /// When set, failures are recorded but never disable temporarily.
    ignore_temporarily_disabled: bool,
}

impl HealthController {
    pub fn new(
        configs: Vec<BackendConfig>,
        config_store: Arc<dyn ConfigStore>,
        ignore_temporarily_disabled: bool,
    ) -> Self {
        let backends = configs
            .into_iter()
            .map(|config| {
                (
                    config.name.clone(),
                    Arc::new(Mutex::new(BackendHandle {
                        config,
                        history: VecDeque::new(),
                    })),
                )
            })
            .collect();
        Self {
            backends,
            config_store,
            ignore_temporarily_disabled,
        }
    }

    /// Names of all known backends.
    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    /// Whether the backend may be called right now. A temporary
    /// disablement whose period has elapsed is promoted back to enabled
    /// as a side effect of the check; the failure counter is kept so the
    /// next failure escalates further.
    pub async fn is_eligible(&self, name: &str) -> bool {
        let Some(handle) = self.backends.get(name) else {
            return false;
        };
        let mut handle = handle.lock().await;
        match handle.config.state {
            BackendState::Enabled => true,
            BackendState::DisabledPermanent | BackendState::DisabledByUser => false,
            BackendState::DisabledTemporary => {
                let expired = handle
                    .config
                    .disabled_until
                    .map(|until| until <= Utc::now())
                    .unwrap_or(true);
                if expired {
                    debug!(backend = %name, "temporary disablement expired, re-enabling");
                    handle.config.state = BackendState::Enabled;
                    handle.config.disabled_until = None;
                    self.config_store.save(&handle.config);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Report a successful call: clears the error, resets the failure
    /// counter and re-enables the backend.
    pub async fn report_success(&self, name: &str, kind: AccessKind, response_time_ms: u64) {
        let Some(handle) = self.backends.get(name) else {
            return;
        };
        let mut handle = handle.lock().await;
        if handle.config.disabled_level > 0 {
            debug!(
                backend = %name,
                failures = handle.config.disabled_level,
                "backend recovered after consecutive failures"
            );
        }
        handle.config.state = BackendState::Enabled;
        handle.config.last_error = None;
        handle.config.disabled_until = None;
        handle.config.disabled_level = 0;
        self.config_store.save(&handle.config);
        handle.record(kind, AccessResult::Successful, Some(response_time_ms));
    }

    /// Report a failed call. Permanent failures disable until an operator
    /// re-enables; otherwise the failure counter advances and the backend
    /// is disabled for the corresponding backoff period.
    pub async fn report_failure(
        &self,
        name: &str,
        reason: &str,
        permanent: bool,
        kind: AccessKind,
        result: AccessResult,
    ) {
        let Some(handle) = self.backends.get(name) else {
            return;
        };
        let mut handle = handle.lock().await;
        if permanent {
            warn!(
                backend = %name,
                "unrecoverable error, backend disabled until re-enabled by the user"
            );
            handle.config.state = BackendState::DisabledPermanent;
        } else if !self.ignore_temporarily_disabled {
            handle.config.state = BackendState::DisabledTemporary;
            handle.config.disabled_level += 1;
            let disabled_until =
                Utc::now() + Duration::minutes(backoff_minutes(handle.config.disabled_level));
            handle.config.disabled_until = Some(disabled_until);
            warn!(
                backend = %name,
                until = %disabled_until,
                consecutive_failures = handle.config.disabled_level,
                "backend temporarily disabled after error"
            );
        }
        handle.config.last_error = Some(reason.to_string());
        self.config_store.save(&handle.config);
        handle.record(kind, result, None);
    }

    /// Classify a web access failure and report it. Authentication
    /// failures disable permanently; protocol and connectivity failures
    /// disable temporarily.
    pub async fn report_access_error(&self, name: &str, err: &WebAccessError, kind: AccessKind) {
        let (permanent, result) = match err {
            WebAccessError::Auth { .. } => {
                error!(backend = %name, "backend refused authentication");
                (true, AccessResult::AuthError)
            }
            WebAccessError::ProtocolError { .. } => {
                error!(backend = %name, error = %err, "backend reported an error");
                (false, AccessResult::ApiError)
            }
            WebAccessError::Unreachable { .. } => {
                error!(backend = %name, error = %err, "backend unreachable");
                (false, AccessResult::ConnectionError)
            }
        };
        self.report_failure(name, &err.to_string(), permanent, kind, result)
            .await;
    }

    /// Record a failure that happened on our side (e.g. a response the
    /// adapter could not parse). The access is recorded as successful
    /// from the backend's perspective and never disables it.
    pub async fn report_host_error(&self, name: &str, kind: AccessKind) {
        let Some(handle) = self.backends.get(name) else {
            return;
        };
        let mut handle = handle.lock().await;
        handle.record(kind, AccessResult::HostError, None);
    }

    /// Manually re-enable a backend, clearing any disablement.
    pub async fn enable(&self, name: &str) {
        let Some(handle) = self.backends.get(name) else {
            return;
        };
        let mut handle = handle.lock().await;
        handle.config.state = BackendState::Enabled;
        handle.config.disabled_level = 0;
        handle.config.disabled_until = None;
        handle.config.last_error = None;
        self.config_store.save(&handle.config);
    }

    /// Copy of a backend's current config, for reporting and URL building.
    pub async fn snapshot(&self, name: &str) -> Option<BackendConfig> {
        match self.backends.get(name) {
            Some(handle) => Some(handle.lock().await.config.clone()),
            None => None,
        }
    }

    /// Most recent access events for a backend, oldest first.
    pub async fn recent_events(&self, name: &str) -> Vec<AccessEvent> {
        match self.backends.get(name) {
            Some(handle) => handle.lock().await.history.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockConfigStore;

    fn controller(names: &[&str]) -> (HealthController, Arc<MockConfigStore>) {
        let store = Arc::new(MockConfigStore::new());
        let configs = names
            .iter()
            .map(|n| BackendConfig::new(*n, format!("http://{n}")))
            .collect();
        (
            HealthController::new(configs, store.clone(), false),
            store,
        )
    }

    #[test]
    fn test_backoff_is_monotonic_and_clamped() {
        let mut last = -1;
        for level in 0..8 {
            let minutes = backoff_minutes(level);
            assert!(minutes >= last);
            last = minutes;
        }
        assert_eq!(backoff_minutes(7), 1440);
        assert_eq!(backoff_minutes(8), 1440);
        assert_eq!(backoff_minutes(1000), 1440);
    }

    #[tokio::test]
    async fn test_enabled_backend_is_eligible() {
        let (controller, _) = controller(&["a"]);
        assert!(controller.is_eligible("a").await);
        assert!(!controller.is_eligible("unknown").await);
    }

    #[tokio::test]
    async fn test_first_failure_disables_for_fifteen_minutes() {
        let (controller, store) = controller(&["a"]);
        controller
            .report_failure("a", "boom", false, AccessKind::Search, AccessResult::ApiError)
            .await;

        let config = controller.snapshot("a").await.unwrap();
        assert_eq!(config.state, BackendState::DisabledTemporary);
        assert_eq!(config.disabled_level, 1);
        assert_eq!(config.last_error.as_deref(), Some("boom"));

        let remaining = config.disabled_until.unwrap() - Utc::now();
        assert!(remaining <= Duration::minutes(15));
        assert!(remaining > Duration::minutes(14));

        assert!(!controller.is_eligible("a").await);
        assert!(store.saved_count() >= 1);
    }

    #[tokio::test]
    async fn test_consecutive_failures_escalate_backoff() {
        let (controller, _) = controller(&["a"]);
        for k in 1..=10u32 {
            controller
                .report_failure("a", "boom", false, AccessKind::Search, AccessResult::ApiError)
                .await;
            let config = controller.snapshot("a").await.unwrap();
            assert_eq!(config.disabled_level, k);

            let expected = backoff_minutes(k);
            let remaining = config.disabled_until.unwrap() - Utc::now();
            assert!(remaining <= Duration::minutes(expected));
            assert!(remaining > Duration::minutes(expected) - Duration::seconds(5));
        }
        // Clamped at the 24h cap.
        let config = controller.snapshot("a").await.unwrap();
        let remaining = config.disabled_until.unwrap() - Utc::now();
        assert!(remaining <= Duration::minutes(1440));
        assert!(remaining > Duration::minutes(1439));
    }

    #[tokio::test]
    async fn test_success_resets_disablement_level() {
        let (controller, _) = controller(&["a"]);
        for _ in 0..5 {
            controller
                .report_failure("a", "boom", false, AccessKind::Search, AccessResult::ApiError)
                .await;
        }
        controller.report_success("a", AccessKind::Search, 120).await;

        let config = controller.snapshot("a").await.unwrap();
        assert_eq!(config.state, BackendState::Enabled);
        assert_eq!(config.disabled_level, 0);
        assert!(config.disabled_until.is_none());
        assert!(config.last_error.is_none());
        assert!(controller.is_eligible("a").await);
    }

    #[tokio::test]
    async fn test_permanent_failure_never_self_heals() {
        let (controller, _) = controller(&["a"]);
        controller
            .report_failure(
                "a",
                "wrong api key",
                true,
                AccessKind::Search,
                AccessResult::AuthError,
            )
            .await;

        let config = controller.snapshot("a").await.unwrap();
        assert_eq!(config.state, BackendState::DisabledPermanent);
        // No disabled_until was set; time passing changes nothing.
        assert!(config.disabled_until.is_none());
        assert!(!controller.is_eligible("a").await);

        controller.enable("a").await;
        assert!(controller.is_eligible("a").await);
    }

    #[tokio::test]
    async fn test_expired_temporary_disablement_promotes_to_enabled() {
        let (controller, _) = controller(&["a"]);
        controller
            .report_failure("a", "boom", false, AccessKind::Search, AccessResult::ApiError)
            .await;

        // Rewind the deadline into the past.
        {
            let handle = controller.backends.get("a").unwrap();
            let mut handle = handle.lock().await;
            handle.config.disabled_until = Some(Utc::now() - Duration::minutes(1));
        }

        assert!(controller.is_eligible("a").await);
        let config = controller.snapshot("a").await.unwrap();
        assert_eq!(config.state, BackendState::Enabled);
        // The failure counter survives promotion so the next failure escalates.
        assert_eq!(config.disabled_level, 1);
    }

    #[tokio::test]
    async fn test_access_error_classification() {
        let (controller, _) = controller(&["a", "b", "c"]);

        controller
            .report_access_error(
                "a",
                &WebAccessError::Auth {
                    message: "401".to_string(),
                },
                AccessKind::Search,
            )
            .await;
        assert_eq!(
            controller.snapshot("a").await.unwrap().state,
            BackendState::DisabledPermanent
        );

        controller
            .report_access_error(
                "b",
                &WebAccessError::ProtocolError {
                    code: Some(500),
                    message: "broken".to_string(),
                },
                AccessKind::Search,
            )
            .await;
        assert_eq!(
            controller.snapshot("b").await.unwrap().state,
            BackendState::DisabledTemporary
        );

        controller
            .report_access_error(
                "c",
                &WebAccessError::Unreachable {
                    message: "timeout".to_string(),
                },
                AccessKind::Search,
            )
            .await;
        assert_eq!(
            controller.snapshot("c").await.unwrap().state,
            BackendState::DisabledTemporary
        );
    }

    #[tokio::test]
    async fn test_host_error_does_not_disable() {
        let (controller, _) = controller(&["a"]);
        controller.report_host_error("a", AccessKind::Search).await;

        let config = controller.snapshot("a").await.unwrap();
        assert_eq!(config.state, BackendState::Enabled);
        assert_eq!(config.disabled_level, 0);

        let events = controller.recent_events("a").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].result, AccessResult::HostError);
    }

    #[tokio::test]
    async fn test_ignore_temporarily_disabled_policy() {
        let store = Arc::new(MockConfigStore::new());
        let controller = HealthController::new(
            vec![BackendConfig::new("a", "http://a")],
            store,
            true,
        );
        controller
            .report_failure("a", "boom", false, AccessKind::Search, AccessResult::ApiError)
            .await;

        let config = controller.snapshot("a").await.unwrap();
        assert_eq!(config.state, BackendState::Enabled);
        assert_eq!(config.disabled_level, 0);
        // The error message is still recorded for observability.
        assert_eq!(config.last_error.as_deref(), Some("boom"));
        assert!(controller.is_eligible("a").await);
    }

    #[tokio::test]
    async fn test_access_history_is_bounded() {
        let (controller, _) = controller(&["a"]);
        for _ in 0..150 {
            controller.report_success("a", AccessKind::Search, 5).await;
        }
        assert_eq!(controller.recent_events("a").await.len(), 100);
    }
}
