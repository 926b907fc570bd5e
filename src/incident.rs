//! Incident forwarding.
//!
//! When the alerting source calls the webhook, an [`IncidentPayload`] is built
//! through an [`IncidentMapper`] and posted to the incidents endpoint. The
//! forwarder authenticates for every incident instead of reusing a token
//! obtained by the reporting pipeline.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info};

use crate::auth::{AuthError, CredentialBroker};
use crate::client::{ApiClient, ClientError};
use crate::config::StaticCredentials;

/// Errors raised while forwarding an incident.
#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("Could not authenticate for incident: {0}")]
    Auth(#[from] AuthError),

    #[error("Incident submission failed: {0}")]
    Client(#[from] ClientError),
}

impl IncidentError {
    /// Whether the incidents endpoint answered with a non-2xx status.
    pub fn is_rejected(&self) -> bool {
        matches!(self, IncidentError::Client(e) if e.status().is_some())
    }
}

/// Static fields of an incident, filled from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentTemplate {
    pub category: String,
    pub impact: String,
    pub urgency: String,
    pub description: String,
    pub short_description: String,
    pub reporting_method: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for IncidentTemplate {
    fn default() -> Self {
        Self {
            category: "161".to_string(),
            impact: "3".to_string(),
            urgency: "2".to_string(),
            description: "Cisco Video Device Alert".to_string(),
            short_description: "Synergy Test".to_string(),
            reporting_method: "UnifiedSynergy".to_string(),
            latitude: 38.806965,
            longitude: -9.437355,
        }
    }
}

/// Body posted to the incidents endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentPayload {
    pub category: String,
    pub impact: String,
    pub urgency: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reporting_method: String,
    pub correlation_id: String,
    pub federation_entity: String,
    pub short_description: String,
}

/// Maps the webhook trigger body onto an incident.
pub trait IncidentMapper: Send + Sync {
    fn map(&self, trigger: &Value) -> IncidentPayload;
}

/// Mapper that ignores the trigger and always sends the configured template.
#[derive(Debug, Clone)]
pub struct StaticIncidentMapper {
    template: IncidentTemplate,
    correlation_id: String,
    federation_entity: String,
}

impl StaticIncidentMapper {
    pub fn new(
        template: IncidentTemplate,
        correlation_id: impl Into<String>,
        federation_entity: impl Into<String>,
    ) -> Self {
        Self {
            template,
            correlation_id: correlation_id.into(),
            federation_entity: federation_entity.into(),
        }
    }
}

impl IncidentMapper for StaticIncidentMapper {
    fn map(&self, _trigger: &Value) -> IncidentPayload {
        let t = &self.template;
        IncidentPayload {
            category: t.category.clone(),
            impact: t.impact.clone(),
            urgency: t.urgency.clone(),
            description: t.description.clone(),
            latitude: t.latitude,
            longitude: t.longitude,
            reporting_method: t.reporting_method.clone(),
            correlation_id: self.correlation_id.clone(),
            federation_entity: self.federation_entity.clone(),
            short_description: t.short_description.clone(),
        }
    }
}

/// Authenticates and posts incidents.
pub struct IncidentForwarder {
    client: ApiClient,
    broker: CredentialBroker,
    credentials: StaticCredentials,
    incidents_url: String,
    mapper: Arc<dyn IncidentMapper>,
}

impl IncidentForwarder {
    pub fn new(
        client: ApiClient,
        broker: CredentialBroker,
        credentials: StaticCredentials,
        incidents_url: impl Into<String>,
        mapper: Arc<dyn IncidentMapper>,
    ) -> Self {
        Self {
            client,
            broker,
            credentials,
            incidents_url: incidents_url.into(),
            mapper,
        }
    }

    /// Forward one incident for `trigger`.
    ///
    /// # Errors
    ///
    /// Returns `IncidentError::Auth` if no token could be obtained and
    /// `IncidentError::Client` if the incidents endpoint could not be reached
    /// or rejected the incident.
    pub async fn forward(&self, trigger: &Value) -> Result<IncidentPayload, IncidentError> {
        let payload = self.mapper.map(trigger);
        let credential = self.broker.authenticate(&self.credentials).await?;

        match self
            .client
            .post_json(&self.incidents_url, &payload, Some(&credential.access_token))
            .await
        {
            Ok(_) => {
                info!(
                    correlation_id = %payload.correlation_id,
                    "Incident sent successfully"
                );
                Ok(payload)
            }
            Err(e) => {
                error!(url = %self.incidents_url, error = %e, "Sending incident failed");
                Err(e.into())
            }
        }
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

    fn mapper() -> Arc<dyn IncidentMapper> {
        Arc::new(StaticIncidentMapper::new(
            IncidentTemplate::default(),
            "item-1",
            "entity-1",
        ))
    }

    fn forwarder(server: &MockServer) -> IncidentForwarder {
        let client =
            ApiClient::with_client(build_http_client(Duration::from_secs(5)).unwrap(), "key-1");
        IncidentForwarder::new(
            client.clone(),
            CredentialBroker::new(client, format!("{}/auth", server.uri())),
            StaticCredentials {
                username: "svc-user".to_string(),
                password: "s3cret".to_string(),
            },
            format!("{}/incidents", server.uri()),
            mapper(),
        )
    }

    async fn mount_auth(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "AuthenticationResult": { "AccessToken": "incident-token" }
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn test_static_mapper_ignores_trigger() {
        let mapper = mapper();
        let a = mapper.map(&json!({"alert": "device offline"}));
        let b = mapper.map(&Value::Null);
        assert_eq!(a, b);
        assert_eq!(a.category, "161");
        assert_eq!(a.correlation_id, "item-1");
        assert_eq!(a.federation_entity, "entity-1");
    }

    #[test]
    fn test_incident_payload_serialization() {
        let payload = mapper().map(&Value::Null);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(
            json,
            json!({
                "category": "161",
                "impact": "3",
                "urgency": "2",
                "description": "Cisco Video Device Alert",
                "latitude": 38.806965,
                "longitude": -9.437355,
                "reporting_method": "UnifiedSynergy",
                "correlation_id": "item-1",
                "federation_entity": "entity-1",
                "short_description": "Synergy Test"
            })
        );
    }

    #[tokio::test]
    async fn test_forward_authenticates_and_posts() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        let expected = serde_json::to_value(mapper().map(&Value::Null)).unwrap();
        Mock::given(method("POST"))
            .and(path("/incidents"))
            .and(header("authorization", "incident-token"))
            .and(header("x-api-key", "key-1"))
            .and(body_json(expected))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let payload = forwarder(&server).forward(&Value::Null).await.unwrap();
        assert_eq!(payload.correlation_id, "item-1");
    }

    #[tokio::test]
    async fn test_forward_rejected_by_endpoint() {
        let server = MockServer::start().await;
        mount_auth(&server).await;
        Mock::given(method("POST"))
            .and(path("/incidents"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = forwarder(&server).forward(&Value::Null).await.unwrap_err();
        assert!(err.is_rejected());
    }

    #[tokio::test]
    async fn test_forward_stops_when_auth_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/incidents"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let err = forwarder(&server).forward(&Value::Null).await.unwrap_err();
        assert!(matches!(err, IncidentError::Auth(_)));
        assert!(!err.is_rejected());
    }
}
