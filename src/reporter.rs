//! Metrics reporter.
//!
//! Projects a [`SensorSnapshot`] onto the platform's metrics schema and
//! submits it with a bearer token obtained by the credential broker.

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::auth::Credential;
use crate::client::{ApiClient, ClientError};
use crate::collector::SensorSnapshot;

/// Submission of a metrics payload failed.
#[derive(Debug, Error)]
#[error("Metrics submission failed: {0}")]
pub struct SubmitError(#[from] pub ClientError);

/// Value of a single metric. Missing readings are sent as empty strings.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Integer(i64),
    Text(String),
}

impl MetricValue {
    fn optional(value: Option<f64>) -> Self {
        match value {
            Some(v) => MetricValue::Number(v),
            None => MetricValue::Text(String::new()),
        }
    }
}

/// One labelled metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Metric {
    pub label: &'static str,
    pub unit: &'static str,
    pub value: MetricValue,
}

impl Metric {
    fn new(label: &'static str, unit: &'static str, value: MetricValue) -> Self {
        Self { label, unit, value }
    }
}

/// Body of a metrics submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsPayload {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Entity")]
    pub entity: String,

    #[serde(rename = "Metrics")]
    pub metrics: Vec<Metric>,
}

impl MetricsPayload {
    /// Build the fixed seven-entry projection of a snapshot.
    pub fn from_snapshot(
        id: impl Into<String>,
        entity: impl Into<String>,
        snapshot: &SensorSnapshot,
    ) -> Self {
        let metrics = vec![
            Metric::new("Temperature", "°C", MetricValue::optional(snapshot.temperature)),
            Metric::new("Humidity", "%", MetricValue::Number(snapshot.humidity)),
            Metric::new("Air quality", "ppm", MetricValue::optional(snapshot.air_quality)),
            Metric::new("Sound Level", "dB", MetricValue::Number(snapshot.sound_level)),
            Metric::new(
                "Room busy",
                "Yes/No",
                MetricValue::Text(snapshot.presence.as_str().to_string()),
            ),
            Metric::new(
                "People in the Room",
                "persons",
                MetricValue::Integer(snapshot.people_count),
            ),
            Metric::new(
                "Room Max Capacity",
                "persons",
                MetricValue::Integer(snapshot.capacity),
            ),
        ];

        Self {
            id: id.into(),
            entity: entity.into(),
            metrics,
        }
    }
}

/// Submits sensor snapshots to the metrics endpoint.
#[derive(Debug, Clone)]
pub struct MetricsReporter {
    client: ApiClient,
    metrics_url: String,
    item_id: String,
    entity: String,
}

impl MetricsReporter {
    pub fn new(
        client: ApiClient,
        metrics_url: impl Into<String>,
        item_id: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            client,
            metrics_url: metrics_url.into(),
            item_id: item_id.into(),
            entity: entity.into(),
        }
    }

    /// Build the payload this reporter would send for `snapshot`.
    pub fn payload(&self, snapshot: &SensorSnapshot) -> MetricsPayload {
        MetricsPayload::from_snapshot(&self.item_id, &self.entity, snapshot)
    }

    /// Submit `snapshot` once using `credential`.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError` on transport failure or a non-2xx status.
    pub async fn report(
        &self,
        snapshot: &SensorSnapshot,
        credential: &Credential,
    ) -> Result<(), SubmitError> {
        let payload = self.payload(snapshot);

        self.client
            .post_json(&self.metrics_url, &payload, Some(&credential.access_token))
            .await?;

        info!(
            url = %self.metrics_url,
            metrics = payload.metrics.len(),
            "Sensor data accepted by metrics endpoint"
        );
        Ok(())
    }

    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }
}
