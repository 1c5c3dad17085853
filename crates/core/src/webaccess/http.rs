//! Reqwest-backed web access implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::backend::BackendConfig;

use super::{RawResponse, WebAccess, WebAccessError};

/// HTTP implementation of [`WebAccess`].
///
/// Classifies transport failures into the error taxonomy the health
/// controller consumes: timeouts and connection errors become
/// `Unreachable`, 401/403 become `Auth`, any other non-success status
/// becomes `ProtocolError`.
pub struct HttpWebAccess {
    client: Client,
}

impl HttpWebAccess {
    /// Create a new HTTP web access layer.
    pub fn new() -> Self {
        let client = Client::builder()
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }
}

impl Default for HttpWebAccess {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WebAccess for HttpWebAccess {
    async fn get(&self, url: &str, backend: &BackendConfig) -> Result<RawResponse, WebAccessError> {
        debug!(backend = %backend.name, url = %url, "calling backend");

        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(backend.timeout_secs as u64))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    WebAccessError::Unreachable {
                        message: e.to_string(),
                    }
                } else {
                    WebAccessError::ProtocolError {
                        code: None,
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| WebAccessError::Unreachable {
                message: format!("failed to read response body: {e}"),
            })?;

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(WebAccessError::Auth {
                message: format!("HTTP {status}"),
            });
        }
        if !status.is_success() {
            return Err(WebAccessError::ProtocolError {
                code: Some(status.as_u16()),
                message: format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            });
        }

        Ok(RawResponse {
            status: status.as_u16(),
            body,
        })
    }
}
