//! HTTP client for the metrics platform API.
//!
//! One pooled `reqwest` client is shared by the credential broker, the
//! metrics reporter and the incident forwarder. Every request carries the
//! platform API key; authenticated calls also carry the bearer token in the
//! `authorization` header, raw and without a scheme prefix, which is what the
//! platform expects.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// Header carrying the platform API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Errors that can occur during HTTP client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Request(#[source] reqwest::Error),

    /// Server returned an error status code
    #[error("Server error ({code}): {message}")]
    Status { code: StatusCode, message: String },

    /// Failed to parse response body
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Request timeout
    #[error("Request timed out")]
    Timeout,

    /// Client configuration error
    #[error("Client configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

impl ClientError {
    /// Status code returned by the server, if the request got that far.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Build the shared pooled `reqwest` client.
///
/// # Errors
///
/// Returns `ClientError::Config` if the HTTP client cannot be built.
pub fn build_http_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .user_agent(format!("room-bridge/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ClientError::Config(e.to_string()))
}

/// Client for the metrics/incident platform.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The underlying HTTP client (reused for connection pooling)
    client: Client,

    /// Value of the `x-api-key` header
    api_key: String,
}

impl ApiClient {
    /// Create a new API client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Ok(Self::with_client(
            build_http_client(config.request_timeout)?,
            config.api_key.clone(),
        ))
    }

    /// Wrap an existing `reqwest` client.
    pub fn with_client(client: Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
        }
    }

    /// POST a JSON body, optionally authenticated with `token`.
    ///
    /// Returns the response only when the status is 2xx; anything else
    /// becomes `ClientError::Status` carrying the response text.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        token: Option<&str>,
    ) -> Result<Response, ClientError> {
        debug!(url = %url, authenticated = token.is_some(), "POST");

        let mut request = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(body);
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(ClientError::Status {
                code: status,
                message,
            })
        }
    }

    /// Get the underlying `reqwest` client.
    pub fn http(&self) -> &Client {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> ApiClient {
        ApiClient::with_client(
            build_http_client(Duration::from_secs(5)).unwrap(),
            "test-api-key",
        )
    }

    #[test]
    fn test_client_error_display() {
        let err = ClientError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = ClientError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "Invalid JSON".to_string(),
        };
        assert!(format!("{}", err).contains("400"));
        assert!(format!("{}", err).contains("Invalid JSON"));
        assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));

        assert_eq!(ClientError::Parse("eof".to_string()).status(), None);
    }

    #[test]
    fn test_client_creation() {
        let config = Config::default();
        assert!(ApiClient::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_post_json_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/metrics"))
            .and(header("x-api-key", "test-api-key"))
            .and(header("authorization", "token-123"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"hello": "world"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client();
        let url = format!("{}/metrics", server.uri());
        let response = client
            .post_json(&url, &json!({"hello": "world"}), Some("token-123"))
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn test_post_json_maps_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = test_client();
        let err = client
            .post_json(&server.uri(), &json!({}), None)
            .await
            .unwrap_err();

        match err {
            ClientError::Status { code, message } => {
                assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(message, "maintenance");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_post_json_transport_failure() {
        // Nothing listens on port 9 (discard) in the test environment
        let client = test_client();
        let err = client
            .post_json("http://127.0.0.1:9/metrics", &json!({}), None)
            .await
            .unwrap_err();
        assert!(err.status().is_none());
    }
}
