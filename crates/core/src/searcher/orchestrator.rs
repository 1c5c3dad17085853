//! Search orchestration: per-backend state machine and the fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use crate::backend::{AccessKind, BackendConfig, HealthController};
use crate::config::SearchSourceRestriction;

use super::acceptor::ResultAcceptor;
use super::dedup::ResultPersister;
use super::query_gen::QueryGenerator;
use super::{
    AggregatedResult, BackendAdapter, FallbackState, SearchError, SearchEvent, SearchOutcome,
    SearchRequest,
};

/// Capacity of the progress event channel. Slow subscribers lose old
/// events rather than blocking the search.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runs one search against one backend, reporting the call's fate to the
/// health controller. Every run ends in a [`SearchOutcome`]; errors never
/// escape this type.
pub struct BackendSearcher {
    name: String,
    adapter: Arc<dyn BackendAdapter>,
    web: Arc<dyn crate::webaccess::WebAccess>,
    health: Arc<HealthController>,
    query_generator: Arc<QueryGenerator>,
    acceptor: Arc<dyn ResultAcceptor>,
    persister: Arc<ResultPersister>,
    fallback_policy: SearchSourceRestriction,
    events: broadcast::Sender<SearchEvent>,
}

impl BackendSearcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        adapter: Arc<dyn BackendAdapter>,
        web: Arc<dyn crate::webaccess::WebAccess>,
        health: Arc<HealthController>,
        query_generator: Arc<QueryGenerator>,
        acceptor: Arc<dyn ResultAcceptor>,
        persister: Arc<ResultPersister>,
        fallback_policy: SearchSourceRestriction,
        events: broadcast::Sender<SearchEvent>,
    ) -> Self {
        Self {
            name: name.into(),
            adapter,
            web,
            health,
            query_generator,
            acceptor,
            persister,
            fallback_policy,
            events,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn emit(&self, event: SearchEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Run the search, retrying at most once with a generated query when
    /// an id-based search comes back empty and the fallback policy allows
    /// it for this request's source.
    pub async fn search(&self, request: SearchRequest) -> SearchOutcome {
        let mut request = request;
        let outcome = self.search_once(&mut request).await;
        self.emit(SearchEvent::BackendFinished {
            backend: self.name.clone(),
        });

        if !self.should_fall_back(&request, &outcome) {
            return outcome;
        }

        info!(
            backend = %self.name,
            search = %request.id,
            "id-based search returned nothing, retrying with a generated query"
        );
        request.internal.fallback_state = FallbackState::Requested;
        self.emit(SearchEvent::FallbackInitiated {
            backend: self.name.clone(),
        });

        let retry = self.search_once(&mut request).await;
        self.emit(SearchEvent::BackendFinished {
            backend: self.name.clone(),
        });
        retry
    }

    /// Fallback applies once per request: an id search that succeeded
    /// with zero results, no explicit query, and a policy that covers
    /// this source.
    fn should_fall_back(&self, request: &SearchRequest, outcome: &SearchOutcome) -> bool {
        outcome.successful
            && outcome.items.is_empty()
            && outcome.total_available == 0
            && request.query.is_none()
            && !request.identifiers.is_empty()
            && request.internal.fallback_state == FallbackState::None
            && self.fallback_policy.meets(request.source)
    }

    /// One pass of the search state machine: query generation, URL
    /// building, the backend call, parsing, filtering, persistence.
    async fn search_once(&self, request: &mut SearchRequest) -> SearchOutcome {
        let Some(config) = self.health.snapshot(&self.name).await else {
            return SearchOutcome::failed(&self.name, "backend is not registered");
        };

        match self.run_passes(request, &config).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.report_error(&err).await;
                SearchOutcome::failed(&self.name, err.to_string())
            }
        }
    }

    async fn run_passes(
        &self,
        request: &mut SearchRequest,
        config: &BackendConfig,
    ) -> Result<SearchOutcome, SearchError> {
        let query = self
            .query_generator
            .generate_if_applicable(request, config)
            .await?;
        self.emit(SearchEvent::Message {
            backend: self.name.clone(),
            message: format!("Searching for: {query}"),
        });

        let url = self
            .adapter
            .build_search_url(request, config, request.offset, request.limit)?;
        debug!(backend = %self.name, search = %request.id, url = %url, "calling backend");

        let started = Instant::now();
        let response = self.web.get(&url, config).await?;
        let response_time_ms = started.elapsed().as_millis() as u64;
        self.health
            .report_success(&self.name, AccessKind::Search, response_time_ms)
            .await;

        let items = self.adapter.parse(&response)?;
        debug!(
            backend = %self.name,
            search = %request.id,
            count = items.len(),
            response_time_ms,
            "backend responded"
        );

        let accepted = self.acceptor.accept(items, request);
        let mut outcome = SearchOutcome {
            backend: self.name.clone(),
            successful: true,
            items: accepted.accepted,
            total_available: 0,
            offset: request.offset,
            limit: request.limit,
            rejection_reasons: accepted.rejected,
            response_time_ms: Some(response_time_ms),
            error: None,
        };
        self.persister.persist(&self.name, &mut outcome.items).await;
        self.adapter.complete_outcome(&response, &mut outcome);
        Ok(outcome)
    }

    /// A backend failure counts against its health; a local failure
    /// (bad query, unparsable payload) must not disable the backend.
    async fn report_error(&self, err: &SearchError) {
        match err {
            SearchError::Access(e) => {
                self.health
                    .report_access_error(&self.name, e, AccessKind::Search)
                    .await;
            }
            SearchError::Parsing(_) => {
                warn!(backend = %self.name, error = %err, "could not parse backend response");
                self.health
                    .report_host_error(&self.name, AccessKind::Search)
                    .await;
            }
            SearchError::QueryGeneration(_) | SearchError::Aborted(_) => {
                debug!(backend = %self.name, error = %err, "search aborted before backend call");
            }
        }
    }
}

/// Fans a request out to all eligible backends and merges the outcomes.
pub struct MetaSearcher {
    health: Arc<HealthController>,
    searchers: HashMap<String, Arc<BackendSearcher>>,
    events: broadcast::Sender<SearchEvent>,
    timeout_secs: u32,
}

impl MetaSearcher {
    pub fn new(health: Arc<HealthController>, timeout_secs: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            health,
            searchers: HashMap::new(),
            events,
            timeout_secs,
        }
    }

    /// Sender handed to backend searchers so their progress events reach
    /// this searcher's subscribers.
    pub fn event_sender(&self) -> broadcast::Sender<SearchEvent> {
        self.events.clone()
    }

    /// Watch search progress. Each subscriber gets every event emitted
    /// after the call.
    pub fn subscribe(&self) -> broadcast::Receiver<SearchEvent> {
        self.events.subscribe()
    }

    pub fn register_backend(&mut self, searcher: Arc<BackendSearcher>) {
        self.searchers.insert(searcher.name().to_string(), searcher);
    }

    /// Backends this request will be sent to. An explicit backend list
    /// on the request bypasses the health check: the caller asked for
    /// exactly these.
    async fn select_backends(&self, request: &SearchRequest) -> Vec<Arc<BackendSearcher>> {
        let mut selected = Vec::new();
        match &request.backends {
            Some(names) => {
                for name in names {
                    match self.searchers.get(name) {
                        Some(searcher) => selected.push(searcher.clone()),
                        None => warn!(backend = %name, "requested backend is not registered"),
                    }
                }
            }
            None => {
                for (name, searcher) in &self.searchers {
                    if self.health.is_eligible(name).await {
                        selected.push(searcher.clone());
                    } else {
                        debug!(backend = %name, "skipping disabled backend");
                    }
                }
            }
        }
        selected
    }

    /// Run the search against every selected backend concurrently.
    ///
    /// Always returns a result: a backend failure or a missed deadline
    /// produces an unsuccessful outcome for that backend, never an error
    /// for the whole search. A backend that misses the deadline keeps
    /// running detached so its health bookkeeping still completes.
    pub async fn search(&self, request: SearchRequest) -> AggregatedResult {
        let started = Instant::now();
        let selected = self.select_backends(&request).await;
        info!(
            search = %request.id,
            backends = selected.len(),
            kind = ?request.kind,
            "starting search"
        );

        let deadline = Duration::from_secs(self.timeout_secs as u64);
        let handles: Vec<_> = selected
            .iter()
            .map(|searcher| {
                let searcher = searcher.clone();
                let request = request.clone();
                let name = searcher.name().to_string();
                let handle = tokio::spawn(async move { searcher.search(request).await });
                (name, handle)
            })
            .collect();

        let outcomes = join_all(handles.into_iter().map(|(name, handle)| async move {
            match timeout(deadline, handle).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(backend = %name, error = %e, "search task failed");
                    SearchOutcome::failed(&name, "search task failed")
                }
                Err(_) => {
                    warn!(backend = %name, timeout_secs = self.timeout_secs, "backend missed the search deadline");
                    SearchOutcome::failed(&name, "backend did not respond within the deadline")
                }
            }
        }))
        .await;

        let result = merge_outcomes(outcomes, started.elapsed().as_millis() as u64);
        info!(
            search = %request.id,
            items = result.items.len(),
            total_available = result.total_available,
            rejected = result.rejected,
            duration_ms = result.duration_ms,
            "search finished"
        );
        result
    }
}

/// Merge per-backend outcomes, newest publish date first. Undated items
/// sort last.
fn merge_outcomes(outcomes: Vec<SearchOutcome>, duration_ms: u64) -> AggregatedResult {
    let mut items = Vec::new();
    let mut total_available = 0;
    let mut rejected = 0;
    for outcome in &outcomes {
        items.extend(outcome.items.iter().cloned());
        total_available += outcome.total_available;
        rejected += outcome.rejected_count();
    }
    items.sort_by(|a, b| b.publish_date.cmp(&a.publish_date));

    AggregatedResult {
        items,
        total_available,
        rejected,
        outcomes,
        duration_ms,
    }
}
