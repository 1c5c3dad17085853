//! Shared test doubles and fixtures.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{BackendConfig, ConfigStore};
use crate::searcher::{
    BackendAdapter, IdentifierType, MetadataError, MetadataResolver, ResultItem, SearchError,
    SearchRequest,
};
use crate::webaccess::{RawResponse, WebAccess, WebAccessError};

/// A [`ResultItem`] with link and guid derived from the title.
pub fn result_item(backend: &str, title: &str) -> ResultItem {
    ResultItem {
        stable_id: None,
        backend: backend.to_string(),
        title: title.to_string(),
        link: format!("https://{backend}.example/get/{title}"),
        details_link: None,
        backend_guid: format!("{backend}-{title}"),
        first_seen: None,
        publish_date: None,
        size_bytes: None,
        content_kind: Default::default(),
        category: None,
    }
}

/// Records saved configs instead of persisting them.
#[derive(Default)]
pub struct MockConfigStore {
    saved: Mutex<Vec<BackendConfig>>,
}

impl MockConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_count(&self) -> usize {
        self.saved.lock().unwrap().len()
    }

    pub fn last_saved(&self) -> Option<BackendConfig> {
        self.saved.lock().unwrap().last().cloned()
    }
}

impl ConfigStore for MockConfigStore {
    fn save(&self, config: &BackendConfig) {
        self.saved.lock().unwrap().push(config.clone());
    }
}

/// Scripted web access: responses are dequeued per backend in the order
/// they were enqueued. An empty queue yields an empty result list so
/// tests only script what they care about.
#[derive(Default)]
pub struct MockWebAccess {
    queues: Mutex<HashMap<String, VecDeque<Result<RawResponse, WebAccessError>>>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl MockWebAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a successful response whose body is the JSON encoding of
    /// the given items, matching what [`MockBackendAdapter`] parses.
    pub fn enqueue_items(&self, backend: &str, items: Vec<ResultItem>) {
        let body = serde_json::to_string(&items).unwrap();
        self.enqueue_body(backend, &body);
    }

    pub fn enqueue_body(&self, backend: &str, body: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(backend.to_string())
            .or_default()
            .push_back(Ok(RawResponse {
                status: 200,
                body: body.to_string(),
            }));
    }

    pub fn enqueue_error(&self, backend: &str, error: WebAccessError) {
        self.queues
            .lock()
            .unwrap()
            .entry(backend.to_string())
            .or_default()
            .push_back(Err(error));
    }

    pub fn call_count(&self, backend: &str) -> u32 {
        self.calls.lock().unwrap().get(backend).copied().unwrap_or(0)
    }
}

#[async_trait]
impl WebAccess for MockWebAccess {
    async fn get(
        &self,
        _url: &str,
        backend: &BackendConfig,
    ) -> Result<RawResponse, WebAccessError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(backend.name.clone())
            .or_insert(0) += 1;
        let next = self
            .queues
            .lock()
            .unwrap()
            .get_mut(&backend.name)
            .and_then(|queue| queue.pop_front());
        next.unwrap_or_else(|| {
            Ok(RawResponse {
                status: 200,
                body: "[]".to_string(),
            })
        })
    }
}

/// Adapter for a fictional backend protocol: the query goes into a `q`
/// parameter and the response body is a JSON list of result items.
pub struct MockBackendAdapter;

impl BackendAdapter for MockBackendAdapter {
    fn build_search_url(
        &self,
        request: &SearchRequest,
        backend: &BackendConfig,
        offset: u32,
        limit: u32,
    ) -> Result<String, SearchError> {
        let query = request.effective_query();
        Ok(format!(
            "{}/api?q={}&offset={offset}&limit={limit}",
            backend.host,
            urlencoding::encode(&query)
        ))
    }

    fn parse(&self, response: &RawResponse) -> Result<Vec<ResultItem>, SearchError> {
        serde_json::from_str(&response.body).map_err(|e| SearchError::Parsing(e.to_string()))
    }
}

/// Metadata lookup with canned answers.
#[derive(Default)]
pub struct MockMetadataResolver {
    titles: Mutex<HashMap<(IdentifierType, String), String>>,
    known: Mutex<HashMap<IdentifierType, String>>,
    lookups: Mutex<u32>,
}

impl MockMetadataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_title(&self, id_type: IdentifierType, value: &str, title: &str) {
        self.titles
            .lock()
            .unwrap()
            .insert((id_type, value.to_string()), title.to_string());
    }

    pub fn set_known_identifier(&self, id_type: IdentifierType, value: &str) {
        self.known
            .lock()
            .unwrap()
            .insert(id_type, value.to_string());
    }

    pub fn known_identifier_lookups(&self) -> u32 {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl MetadataResolver for MockMetadataResolver {
    async fn resolve_title(
        &self,
        id_type: IdentifierType,
        value: &str,
    ) -> Result<String, MetadataError> {
        self.titles
            .lock()
            .unwrap()
            .get(&(id_type, value.to_string()))
            .cloned()
            .ok_or_else(|| MetadataError::NotFound(id_type, value.to_string()))
    }

    async fn find_known_identifiers(
        &self,
        _identifiers: &HashMap<IdentifierType, String>,
    ) -> HashMap<IdentifierType, String> {
        *self.lookups.lock().unwrap() += 1;
        self.known.lock().unwrap().clone()
    }
}
