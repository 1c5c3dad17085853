//! Types for the meta-search system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::backend::BackendConfig;
use crate::webaccess::{RawResponse, WebAccessError};

/// What kind of content a search is after.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SearchKind {
    General,
    Tv,
    Movie,
    Book,
}

/// A typed external identifier usable to look up or search content.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Tvdb,
    Tvmaze,
    Tvrage,
    Imdb,
    TvImdb,
    Tmdb,
}

/// Where a search request originated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchSource {
    /// Search started from within the application.
    Internal,
    /// Search received over the external API surface.
    Api,
}

/// Whether a result points to a binary (NZB) or a torrent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Nzb,
    Torrent,
}

/// Guard against infinite fallback loops. A request starts at `None`,
/// moves to `Requested` when the orchestrator decides to retry with a
/// generated query, and to `Used` once the query generator has consumed
/// the request. `Used` is terminal.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackState {
    #[default]
    None,
    Requested,
    Used,
}

/// State the orchestrator accumulates on a request during its lifetime.
/// Callers never set these fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InternalData {
    /// Title resolved from identifiers by a prior metadata lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_title: Option<String>,
    /// Query synthesized by the fallback generator, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_query: Option<String>,
    #[serde(default)]
    pub fallback_state: FallbackState,
}

/// One logical search, immutable after construction except for the
/// orchestrator-owned [`InternalData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Correlation id for logging.
    pub id: Uuid,
    pub source: SearchSource,
    pub kind: SearchKind,
    /// Free-text query. When absent the query generator may synthesize one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Identifier type -> value, order irrelevant.
    #[serde(default)]
    pub identifiers: HashMap<IdentifierType, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    /// Kept as text; some callers send values like "5a".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Age bounds in days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u32>,
    /// Size bounds in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_mb: Option<u64>,
    /// Optional: limit to specific backends. Explicitly selected backends
    /// are searched even when auto-disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backends: Option<Vec<String>>,
    #[serde(default)]
    pub internal: InternalData,
}

fn default_limit() -> u32 {
    100
}

impl SearchRequest {
    /// Create a request with defaults for everything but kind and source.
    pub fn new(kind: SearchKind, source: SearchSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            kind,
            query: None,
            category: None,
            identifiers: HashMap::new(),
            season: None,
            episode: None,
            title: None,
            author: None,
            offset: 0,
            limit: default_limit(),
            min_age_days: None,
            max_age_days: None,
            min_size_mb: None,
            max_size_mb: None,
            backends: None,
            internal: InternalData::default(),
        }
    }

    /// The query text a backend URL should carry: a generated query wins
    /// over the caller's free text; empty when neither exists.
    pub fn effective_query(&self) -> String {
        self.internal
            .generated_query
            .clone()
            .or_else(|| self.query.clone())
            .unwrap_or_default()
    }

    /// First identifier in canonical type order, for deterministic
    /// title resolution.
    pub fn first_identifier(&self) -> Option<(IdentifierType, &str)> {
        let mut types: Vec<_> = self.identifiers.keys().copied().collect();
        types.sort();
        types
            .first()
            .and_then(|t| self.identifiers.get(t).map(|v| (*t, v.as_str())))
    }
}

/// A single discovered release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultItem {
    /// Stable dedup/persistence key, attached by the deduplicator.
    /// Identical backend/title/link/guid always yield the same value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<u64>,
    /// Which backend returned this result.
    pub backend: String,
    pub title: String,
    /// Download link.
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details_link: Option<String>,
    /// Backend-assigned external id.
    pub backend_guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Per-backend result of one orchestration pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub backend: String,
    pub successful: bool,
    /// Accepted, deduplicated items.
    pub items: Vec<ResultItem>,
    /// Total results the backend reports as available for this query.
    pub total_available: u32,
    pub offset: u32,
    pub limit: u32,
    /// Rejection reason -> count, from the result acceptor.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rejection_reasons: HashMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SearchOutcome {
    /// An unsuccessful outcome carrying only an error message.
    pub fn failed(backend: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            successful: false,
            items: Vec::new(),
            total_available: 0,
            offset: 0,
            limit: 0,
            rejection_reasons: HashMap::new(),
            response_time_ms: None,
            error: Some(error.into()),
        }
    }

    /// Number of results the acceptor rejected.
    pub fn rejected_count(&self) -> u32 {
        self.rejection_reasons.values().sum()
    }
}

/// Merged result of one fan-out across all searched backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// Accepted items across backends, newest publish date first.
    pub items: Vec<ResultItem>,
    /// Sum of per-backend total available counts.
    pub total_available: u32,
    /// Sum of per-backend rejection counts.
    pub rejected: u32,
    /// Per-backend outcomes, kept for observability even on failure.
    pub outcomes: Vec<SearchOutcome>,
    pub duration_ms: u64,
}

/// Progress signals emitted while a search runs.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// Human-readable progress message.
    Message { backend: String, message: String },
    /// An id-based search came back empty and a fallback search starts.
    FallbackInitiated { backend: String },
    /// Terminal signal: this backend's state machine reached DONE.
    /// Emitted once per orchestration pass, so callers awaiting multiple
    /// backends can count completions deterministically.
    BackendFinished { backend: String },
}

/// Errors raised while searching a single backend. All variants are
/// converted to an unsuccessful [`SearchOutcome`] at the orchestrator
/// boundary; none propagate to the cache or caller layer.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No usable query could be synthesized.
    #[error("unable to generate query: {0}")]
    QueryGeneration(String),

    /// A local precondition failed before the backend was called.
    #[error("search aborted: {0}")]
    Aborted(String),

    /// The backend call itself failed; classified by the web access layer.
    #[error(transparent)]
    Access(#[from] WebAccessError),

    /// The backend responded but its payload could not be parsed.
    #[error("failed to parse backend response: {0}")]
    Parsing(String),
}

/// Capability interface for one backend family. The orchestrator is
/// adapter-agnostic: it builds the query, the adapter turns it into a
/// URL and turns the raw response back into items.
pub trait BackendAdapter: Send + Sync {
    /// Build the full search URL for this request.
    fn build_search_url(
        &self,
        request: &SearchRequest,
        backend: &BackendConfig,
        offset: u32,
        limit: u32,
    ) -> Result<String, SearchError>;

    /// Parse the raw response into result items.
    fn parse(&self, response: &RawResponse) -> Result<Vec<ResultItem>, SearchError>;

    /// Fill paging metadata on the outcome, most importantly the total
    /// available count. The default assumes the backend reported
    /// everything it had.
    fn complete_outcome(&self, _response: &RawResponse, outcome: &mut SearchOutcome) {
        outcome.total_available = outcome.items.len() as u32 + outcome.rejected_count();
    }
}
