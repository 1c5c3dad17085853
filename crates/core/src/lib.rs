pub mod backend;
pub mod cache;
pub mod config;
pub mod searcher;
pub mod testing;
pub mod webaccess;

pub use backend::{BackendConfig, BackendState, ConfigStore, HealthController};
pub use cache::{CachedSearcher, Searcher};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use searcher::{
    AggregatedResult, BackendSearcher, MetaSearcher, ResultItem, SearchEvent, SearchOutcome,
    SearchRequest,
};
pub use webaccess::{HttpWebAccess, WebAccess};
