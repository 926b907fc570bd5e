//! Credential broker.
//!
//! Exchanges the static username/password for a short-lived bearer token.
//! Tokens are not cached: every reporting cycle, and every webhook trigger,
//! authenticates on its own and uses the token for a single request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::client::{ApiClient, ClientError};
use crate::config::StaticCredentials;

/// Errors returned by the credential broker.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Transport failure or non-2xx status from the auth endpoint
    #[error("Authentication request failed: {0}")]
    Client(#[from] ClientError),

    /// The response did not contain `AuthenticationResult.AccessToken`
    #[error("Malformed authentication response: {0}")]
    MalformedResponse(String),
}

/// A bearer token obtained for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub obtained_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthResponse {
    authentication_result: AuthenticationResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    access_token: String,
}

/// Obtains bearer tokens from the platform's authentication endpoint.
#[derive(Debug, Clone)]
pub struct CredentialBroker {
    client: ApiClient,
    auth_url: String,
}

impl CredentialBroker {
    pub fn new(client: ApiClient, auth_url: impl Into<String>) -> Self {
        Self {
            client,
            auth_url: auth_url.into(),
        }
    }

    /// Exchange `credentials` for a fresh bearer token.
    ///
    /// Performs exactly one request; there is no retry.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Client` on transport failure or a non-2xx status,
    /// and `AuthError::MalformedResponse` when the body does not have the
    /// expected shape.
    pub async fn authenticate(
        &self,
        credentials: &StaticCredentials,
    ) -> Result<Credential, AuthError> {
        debug!(url = %self.auth_url, username = %credentials.username, "Requesting access token");

        let body = AuthRequest {
            username: &credentials.username,
            password: &credentials.password,
        };
        let response = self.client.post_json(&self.auth_url, &body, None).await?;

        let text = response.text().await.map_err(ClientError::from)?;
        let parsed: AuthResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        if parsed.authentication_result.access_token.is_empty() {
            return Err(AuthError::MalformedResponse(
                "empty AccessToken".to_string(),
            ));
        }

        info!("Platform access token created");
        Ok(Credential {
            access_token: parsed.authentication_result.access_token,
            obtained_at: Utc::now(),
        })
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::build_http_client;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn broker(server: &MockServer) -> CredentialBroker {
        let client =
            ApiClient::with_client(build_http_client(Duration::from_secs(5)).unwrap(), "key-1");
        CredentialBroker::new(client, format!("{}/auth", server.uri()))
    }

    fn credentials() -> StaticCredentials {
        StaticCredentials {
            username: "svc-user".to_string(),
            password: "s3cret".to_string(),
        }
    }

    #[tokio::test]
    async fn test_authenticate_extracts_nested_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(header("x-api-key", "key-1"))
            .and(body_json(json!({"username": "svc-user", "password": "s3cret"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": {
                    "AccessToken": "eyJ.token",
                    "ExpiresIn": 3600,
                    "TokenType": "Bearer"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let credential = broker(&server).authenticate(&credentials()).await.unwrap();
        assert_eq!(credential.access_token, "eyJ.token");
        assert!(credential.obtained_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_authenticate_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
            .expect(1)
            .mount(&server)
            .await;

        let err = broker(&server).authenticate(&credentials()).await.unwrap_err();
        match err {
            AuthError::Client(client_err) => {
                assert_eq!(client_err.status().map(|s| s.as_u16()), Some(401));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_authenticate_unexpected_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "abc"})))
            .mount(&server)
            .await;

        let err = broker(&server).authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_authenticate_empty_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": { "AccessToken": "" }
            })))
            .mount(&server)
            .await;

        let err = broker(&server).authenticate(&credentials()).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedResponse(_)));
    }
}
