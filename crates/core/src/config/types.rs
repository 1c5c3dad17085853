use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::BackendConfig;
use crate::searcher::SearchSource;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub searching: SearchingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// Which request origins a policy applies to.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchSourceRestriction {
    None,
    Internal,
    Api,
    Both,
}

impl SearchSourceRestriction {
    /// Whether a request from the given source matches this policy.
    pub fn meets(&self, source: SearchSource) -> bool {
        match self {
            Self::None => false,
            Self::Both => true,
            Self::Internal => source == SearchSource::Internal,
            Self::Api => source == SearchSource::Api,
        }
    }
}

/// Search behavior configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchingConfig {
    /// When to synthesize a query for backends that can't handle the
    /// request natively.
    #[serde(default = "default_restriction")]
    pub generate_queries: SearchSourceRestriction,
    /// When an empty id-based search may retry with a generated query.
    #[serde(default = "default_restriction")]
    pub id_fallback_to_query_generation: SearchSourceRestriction,
    /// When set, failing backends are never temporarily disabled.
    #[serde(default)]
    pub ignore_temporarily_disabled: bool,
    /// Overall fan-out deadline per search.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Default maximum result age applied to requests without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
}

impl Default for SearchingConfig {
    fn default() -> Self {
        Self {
            generate_queries: default_restriction(),
            id_fallback_to_query_generation: default_restriction(),
            ignore_temporarily_disabled: false,
            timeout_secs: default_timeout(),
            max_age_days: None,
        }
    }
}

fn default_restriction() -> SearchSourceRestriction {
    SearchSourceRestriction::Internal
}

fn default_timeout() -> u32 {
    30
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("manifold.db")
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub searching: SearchingConfig,
    pub database: DatabaseConfig,
    pub backends: Vec<SanitizedBackendConfig>,
}

/// Sanitized backend config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedBackendConfig {
    pub name: String,
    pub host: String,
    pub api_key_configured: bool,
    pub state: crate::backend::BackendState,
    pub disabled_level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            searching: config.searching.clone(),
            database: config.database.clone(),
            backends: config
                .backends
                .iter()
                .map(|b| SanitizedBackendConfig {
                    name: b.name.clone(),
                    host: b.host.clone(),
                    api_key_configured: !b.api_key.is_empty(),
                    state: b.state,
                    disabled_level: b.disabled_level,
                    last_error: b.last_error.clone(),
                })
                .collect(),
        }
    }
}
