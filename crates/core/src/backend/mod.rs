//! Backend configuration and health tracking.
//!
//! A backend (indexer) is an external search service. This module owns
//! the per-backend config records and the health controller that decides
//! whether a backend is called and how failures escalate disablement.

mod health;
mod types;

pub use health::{backoff_minutes, HealthController, DISABLE_PERIODS};
pub use types::*;

/// Persists backend config mutations. Fire-and-forget: the collaborator
/// may batch or delay writes; failures are its own concern.
pub trait ConfigStore: Send + Sync {
    fn save(&self, config: &BackendConfig);
}
