//! Room Telemetry Bridge Library
//!
//! This library bridges a room device's sensors to an external metrics and
//! incident platform:
//!
//! - **device**: Device session trait and the cloud xAPI implementation
//! - **collector**: Sensor snapshot collection with per-attribute defaults
//! - **auth**: Bearer token exchange against the platform auth endpoint
//! - **reporter**: Metrics payload shaping and submission
//! - **scheduler**: Periodic collect → authenticate → report cycles
//! - **watcher**: Occupancy change logging
//! - **incident**: Incident payload mapping and forwarding
//! - **server**: Webhook HTTP surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use room_bridge::auth::CredentialBroker;
//! use room_bridge::client::ApiClient;
//! use room_bridge::config::Config;
//! use room_bridge::device::XapiSession;
//! use room_bridge::reporter::MetricsReporter;
//! use room_bridge::scheduler::ReportingPipeline;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let client = ApiClient::new(&config).expect("Failed to create client");
//!
//!     let session = XapiSession::connect(client.http().clone(), config.device.clone())
//!         .await
//!         .expect("Device unreachable");
//!
//!     let pipeline = ReportingPipeline::new(
//!         session,
//!         CredentialBroker::new(client.clone(), config.auth_url.clone()),
//!         MetricsReporter::new(client, config.metrics_url.clone(), config.item_id.clone(), config.entity.clone()),
//!         config.credentials.clone(),
//!     );
//!     let outcome = pipeline.run_cycle().await;
//!     println!("Cycle finished: {:?}", outcome);
//! }
//! ```

// Module declarations
pub mod auth;
pub mod client;
pub mod collector;
pub mod config;
pub mod device;
pub mod incident;
pub mod reporter;
pub mod scheduler;
pub mod server;
pub mod watcher;

// Re-export commonly used types at crate root for convenience
pub use auth::{AuthError, Credential, CredentialBroker};
pub use client::{ApiClient, ClientError};
pub use collector::{collect, Presence, SensorAttribute, SensorSnapshot};
pub use config::{Config, ConfigError, StaticCredentials};
pub use device::{DeviceError, DeviceSession, StatusEvent, StatusHandler, XapiSession};
pub use incident::{IncidentError, IncidentForwarder, IncidentMapper, IncidentPayload};
pub use reporter::{MetricsPayload, MetricsReporter, SubmitError};
pub use scheduler::{CycleOutcome, CycleScheduler, ReportingPipeline, SchedulerStats};
pub use watcher::OccupancyWatcher;
