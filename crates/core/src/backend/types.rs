//! Per-backend configuration and state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::searcher::{ContentKind, IdentifierType, SearchKind};

/// Disablement state of a backend. Only `Enabled` backends are eligible
/// for a search unless explicitly selected.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendState {
    #[default]
    Enabled,
    /// Auto-disabled with a time-boxed backoff; self-heals.
    DisabledTemporary,
    /// Auto-disabled after an unrecoverable error; needs manual re-enable.
    DisabledPermanent,
    DisabledByUser,
}

/// Settings and health state for one backend. Health fields are mutated
/// exclusively by the health controller; persisted by a [`ConfigStore`]
/// collaborator.
///
/// [`ConfigStore`]: crate::backend::ConfigStore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name.
    pub name: String,
    /// Base URL of the backend.
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    /// Search kinds this backend supports natively.
    #[serde(default = "default_search_kinds")]
    pub search_kinds: Vec<SearchKind>,
    /// Identifier types this backend can search by natively.
    #[serde(default)]
    pub supported_ids: Vec<IdentifierType>,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u32,
    #[serde(default)]
    pub state: BackendState,
    /// Consecutive-failure counter driving backoff selection.
    #[serde(default)]
    pub disabled_level: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn default_search_kinds() -> Vec<SearchKind> {
    vec![SearchKind::General]
}

fn default_timeout_secs() -> u32 {
    30
}

impl BackendConfig {
    /// A backend with the given name and host, everything else default.
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            api_key: String::new(),
            search_kinds: default_search_kinds(),
            supported_ids: Vec::new(),
            content_kind: ContentKind::default(),
            timeout_secs: default_timeout_secs(),
            state: BackendState::Enabled,
            disabled_level: 0,
            disabled_until: None,
            last_error: None,
        }
    }

    /// Whether this backend natively supports the given search kind.
    pub fn supports_kind(&self, kind: SearchKind) -> bool {
        self.search_kinds.contains(&kind)
    }

    /// Whether this backend natively supports any of the given id types.
    pub fn supports_any_id<'a>(
        &self,
        mut id_types: impl Iterator<Item = &'a IdentifierType>,
    ) -> bool {
        id_types.any(|t| self.supported_ids.contains(t))
    }
}

/// What kind of backend access an event records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Search,
    ConnectionCheck,
}

/// How a backend access ended, for the access history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AccessResult {
    Successful,
    AuthError,
    ApiError,
    ConnectionError,
    /// Failure on our side; recorded as successful from the backend's
    /// perspective and never counted against it.
    HostError,
}

/// One recorded backend access, kept in a bounded in-memory history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    pub kind: AccessKind,
    pub result: AccessResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_defaults() {
        let toml = r#"
name = "nzbplanet"
host = "https://api.nzbplanet.example"
"#;
        let config: BackendConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.name, "nzbplanet");
        assert_eq!(config.state, BackendState::Enabled);
        assert_eq!(config.disabled_level, 0);
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.search_kinds, vec![SearchKind::General]);
        assert!(config.supported_ids.is_empty());
        assert_eq!(config.content_kind, ContentKind::Nzb);
    }

    #[test]
    fn test_supports_kind() {
        let mut config = BackendConfig::new("a", "http://a");
        config.search_kinds = vec![SearchKind::General, SearchKind::Tv];
        assert!(config.supports_kind(SearchKind::Tv));
        assert!(!config.supports_kind(SearchKind::Book));
    }

    #[test]
    fn test_supports_any_id() {
        let mut config = BackendConfig::new("a", "http://a");
        config.supported_ids = vec![IdentifierType::Tvdb];

        let provided = [IdentifierType::Imdb, IdentifierType::Tvdb];
        assert!(config.supports_any_id(provided.iter()));

        let provided = [IdentifierType::Tmdb];
        assert!(!config.supports_any_id(provided.iter()));
    }
}
