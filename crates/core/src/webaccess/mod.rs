//! Web access to external search backends.
//!
//! All orchestrator traffic to a backend goes through the [`WebAccess`]
//! trait so failures arrive pre-classified: authentication rejections,
//! backend-reported protocol errors and network-level unreachability are
//! distinct variants, because each drives a different disablement decision
//! in the health controller.

mod http;

pub use http::HttpWebAccess;

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::BackendConfig;

/// Raw response from a backend before adapter-specific parsing.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

/// Classified failures from calling a backend.
#[derive(Debug, Clone, Error)]
pub enum WebAccessError {
    /// The backend rejected our credentials. Never self-heals.
    #[error("backend refused authentication: {message}")]
    Auth { message: String },

    /// The backend answered with a structured error.
    #[error("backend reported an error: {message}")]
    ProtocolError { code: Option<u16>, message: String },

    /// Network failure or timeout before a usable response arrived.
    #[error("backend unreachable: {message}")]
    Unreachable { message: String },
}

/// Trait for issuing calls to a search backend.
#[async_trait]
pub trait WebAccess: Send + Sync {
    /// Call the given URL on behalf of the given backend.
    async fn get(&self, url: &str, backend: &BackendConfig) -> Result<RawResponse, WebAccessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WebAccessError::ProtocolError {
            code: Some(429),
            message: "HTTP 429: slow down".to_string(),
        };
        assert_eq!(err.to_string(), "backend reported an error: HTTP 429: slow down");

        let err = WebAccessError::Unreachable {
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "backend unreachable: connection refused");
    }
}
