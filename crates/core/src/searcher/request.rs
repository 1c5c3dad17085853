//! Request preparation before fan-out.

use std::sync::Arc;

use tracing::debug;

use crate::config::SearchingConfig;

use super::query_gen::MetadataResolver;
use super::SearchRequest;

/// Applies configured defaults and identifier enrichment to incoming
/// requests before the fan-out sees them.
pub struct RequestFactory {
    config: SearchingConfig,
    resolver: Arc<dyn MetadataResolver>,
}

impl RequestFactory {
    pub fn new(config: SearchingConfig, resolver: Arc<dyn MetadataResolver>) -> Self {
        Self { config, resolver }
    }

    /// Fill in the default maximum age and expand the request's
    /// identifiers with any equivalent ids the metadata provider knows.
    /// Caller-provided identifier values are never overwritten.
    pub async fn prepare(&self, mut request: SearchRequest) -> SearchRequest {
        if request.max_age_days.is_none() {
            request.max_age_days = self.config.max_age_days;
        }

        if !request.identifiers.is_empty() {
            let known = self.resolver.find_known_identifiers(&request.identifiers).await;
            for (id_type, value) in known {
                request.identifiers.entry(id_type).or_insert(value);
            }
            debug!(
                search = %request.id,
                identifiers = request.identifiers.len(),
                "request identifiers after enrichment"
            );
        }

        request
    }
}
