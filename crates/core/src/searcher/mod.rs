//! Meta-search: fan a request out to every eligible backend, track each
//! backend's health, synthesize queries for backends that can't handle
//! the request natively, and persist whatever comes back.

mod acceptor;
mod dedup;
mod orchestrator;
mod query_gen;
mod request;
mod store;
mod types;

pub use acceptor::{AcceptorResult, ResultAcceptor, StandardAcceptor};
pub use dedup::{stable_id, ResultPersister};
pub use orchestrator::{BackendSearcher, MetaSearcher};
pub use query_gen::{sanitize_title, MetadataError, MetadataResolver, QueryGenerator};
pub use request::RequestFactory;
pub use store::{ResultStore, SqliteResultStore, StoreError, StoredResult};
pub use types::*;
