//! Fallback query generation.
//!
//! Backends that can't handle a request natively (unsupported identifier
//! types or search kind), and fallback retries after an empty id-based
//! search, get a synthesized free-text query built from the release
//! title plus season/episode and author hints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::backend::BackendConfig;
use crate::config::SearchSourceRestriction;

use super::{FallbackState, IdentifierType, SearchError, SearchKind, SearchRequest};

/// Errors from the external metadata lookup collaborator.
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    #[error("no title known for {0:?} {1}")]
    NotFound(IdentifierType, String),

    #[error("metadata provider error: {0}")]
    Provider(String),
}

/// External metadata lookup (TVDB/TMDB/IMDB and friends).
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolve an identifier to a release title.
    async fn resolve_title(
        &self,
        id_type: IdentifierType,
        value: &str,
    ) -> Result<String, MetadataError>;

    /// Additional identifiers known to belong to the same content.
    async fn find_known_identifiers(
        &self,
        identifiers: &HashMap<IdentifierType, String>,
    ) -> HashMap<IdentifierType, String>;
}

/// Characters that break typical backend query parsers.
const ILLEGAL_QUERY_CHARS: &[char] = &[
    '(', ')', '=', '@', '#', '$', '%', '^', ',', '?', '<', '>', '{', '}', '|', '!', '\'', ':',
];

/// Strip characters that backends tend to choke on.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !ILLEGAL_QUERY_CHARS.contains(c))
        .collect()
}

/// Builds synthesized queries for backends that need them.
pub struct QueryGenerator {
    resolver: Arc<dyn MetadataResolver>,
    policy: SearchSourceRestriction,
}

impl QueryGenerator {
    pub fn new(policy: SearchSourceRestriction, resolver: Arc<dyn MetadataResolver>) -> Self {
        Self { resolver, policy }
    }

    /// Decide whether the backend needs a synthesized query for this
    /// request and build it, storing the result on the request's internal
    /// data. Returns the effective query either way.
    ///
    /// A `Requested` fallback state is consumed here and moves to `Used`
    /// so a second fallback can never trigger for the same request.
    pub async fn generate_if_applicable(
        &self,
        request: &mut SearchRequest,
        backend: &BackendConfig,
    ) -> Result<String, SearchError> {
        if let Some(query) = &request.query {
            return Ok(query.clone());
        }

        let unsupported_kind = !backend.supports_kind(request.kind);
        let unsupported_ids = !backend.supports_any_id(request.identifiers.keys());
        let generation_possible = !request.identifiers.is_empty() || request.title.is_some();
        let generation_enabled = self.policy.meets(request.source);
        let fallback_requested = request.internal.fallback_state == FallbackState::Requested;

        let needed = fallback_requested
            || (generation_possible && generation_enabled && (unsupported_ids || unsupported_kind));
        if !needed {
            debug!(
                backend = %backend.name,
                unsupported_kind,
                unsupported_ids,
                generation_possible,
                generation_enabled,
                "no query generation needed"
            );
            return Ok(request.effective_query());
        }
        if fallback_requested {
            request.internal.fallback_state = FallbackState::Used;
        }

        let mut query = self.resolve_query_base(request).await?;

        // Season/episode hints are left off fallback queries; backends
        // usually still match without them.
        if !fallback_requested {
            if let Some(season) = request.season {
                match &request.episode {
                    Some(episode) => match episode.parse::<u32>() {
                        Ok(episode) => {
                            query.push_str(&format!(" s{season:02}e{episode:02}"));
                        }
                        Err(_) => {
                            let suffix = format!(" s{season:02}{episode}");
                            debug!(
                                episode = %episode,
                                suffix = %suffix,
                                "episode is not numeric, extending query verbatim"
                            );
                            query.push_str(&suffix);
                        }
                    },
                    None => {
                        query.push_str(&format!(" s{season:02}"));
                    }
                }
            }
        }

        if request.kind == SearchKind::Book && !backend.supports_kind(SearchKind::Book) {
            if let Some(author) = &request.author {
                query.push(' ');
                query.push_str(author);
            }
        }

        debug!(backend = %backend.name, query = %query, "generated query");
        request.internal.generated_query = Some(query.clone());
        Ok(query)
    }

    /// Title resolution order: explicit request title, then a title
    /// resolved earlier in this request's lifetime, then a metadata
    /// lookup on the first identifier.
    async fn resolve_query_base(&self, request: &mut SearchRequest) -> Result<String, SearchError> {
        if let Some(title) = &request.title {
            let query = sanitize_title(title);
            debug!(title = %query, "using request title as query base");
            return Ok(query);
        }
        if let Some(title) = &request.internal.resolved_title {
            debug!(title = %title, "using previously resolved title");
            return Ok(title.clone());
        }

        let Some((id_type, value)) = request.first_identifier() else {
            return Err(SearchError::QueryGeneration(
                "no identifier is known".to_string(),
            ));
        };
        let id_value = value.to_string();
        let title = self
            .resolver
            .resolve_title(id_type, &id_value)
            .await
            .map_err(|e| SearchError::QueryGeneration(e.to_string()))?;

        let query = sanitize_title(&title);
        debug!(title = %query, "resolved title from identifier");
        request.internal.resolved_title = Some(query.clone());
        Ok(query)
    }
}
