//! Room Telemetry Bridge - forwards room device telemetry to a metrics platform
//!
//! This service samples a room device's environmental sensors, authenticates
//! against the metrics platform and submits the readings every few minutes.
//! It also logs occupancy changes pushed by the device and exposes a webhook
//! that turns alerts into incidents.
//!
//! ## Features
//!
//! - Reporting cycle at startup and then on a fixed interval
//! - At most one cycle in flight; overlapping ticks are dropped
//! - Occupancy change subscription (log only)
//! - `POST /webhook` incident forwarding
//! - Graceful shutdown on Ctrl+C
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (and `.env` outside
//! production), see `config.rs`:
//!
//! - `DEVICE_ID`, `CLIENT_ID`, `CLIENT_SECRET`, `REFRESH_TOKEN`, `APP_URL`: device platform
//! - `X_API_KEY`, `USERNAME`, `PASSWORD`: metrics platform credentials
//! - `ITEM_ID`, `ENTITY`: identifiers sent with metrics and incidents
//! - `AUTH_URL`, `METRICS_URL`, `INCIDENTS_URL`: metrics platform endpoints
//! - `REPORT_INTERVAL_SECS`: seconds between cycles (default: 300)
//! - `WEBHOOK_PORT`: webhook listen port (default: 3000)
//! - `RUST_LOG`: Logging level filter (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use room_bridge::auth::CredentialBroker;
use room_bridge::client::ApiClient;
use room_bridge::config::{load_dotenv_allowed, Config};
use room_bridge::device::{DeviceSession, XapiSession};
use room_bridge::incident::{IncidentForwarder, StaticIncidentMapper};
use room_bridge::reporter::MetricsReporter;
use room_bridge::scheduler::{CycleScheduler, ReportingPipeline};
use room_bridge::server::{build_router, serve, AppState};
use room_bridge::watcher::{OccupancyWatcher, PRESENCE_PATH};

/// How long to wait for an in-flight cycle when shutting down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if load_dotenv_allowed() {
        // Ok if .env does not exist
        dotenvy::dotenv().ok();
    }

    // Initialize tracing subscriber with environment filter
    init_tracing();

    info!("Starting Room Telemetry Bridge...");

    let config = match Config::from_env() {
        Ok(config) => {
            info!(
                device_id = %config.device.device_id,
                metrics_url = %config.metrics_url,
                report_interval_secs = config.report_interval.as_secs(),
                webhook_port = config.webhook_port,
                "Configuration loaded"
            );
            config
        }
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    // One pooled HTTP client for the device platform and the metrics platform
    let client = match ApiClient::new(&config) {
        Ok(client) => client,
        Err(e) => {
            error!(error = %e, "Failed to create HTTP client");
            std::process::exit(1);
        }
    };

    let session = match XapiSession::connect(client.http().clone(), config.device.clone()).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to connect to device");
            std::process::exit(1);
        }
    };

    // One-off read, just to show the current state at startup
    match session.read(PRESENCE_PATH).await {
        Ok(value) => info!(value = %value, "People presence"),
        Err(e) => warn!(error = %e, "Could not read people presence"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    if let Err(e) = OccupancyWatcher::register(session.as_ref()).await {
        warn!(error = %e, "Failed to subscribe to occupancy changes");
    }
    let notifications_handle = session.start_notifications(shutdown_rx.clone());

    let broker = CredentialBroker::new(client.clone(), config.auth_url.clone());
    let pipeline = ReportingPipeline::new(
        session.clone(),
        broker.clone(),
        MetricsReporter::new(
            client.clone(),
            config.metrics_url.clone(),
            config.item_id.clone(),
            config.entity.clone(),
        ),
        config.credentials.clone(),
    );
    let scheduler = CycleScheduler::new(Arc::new(pipeline), config.report_interval);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));

    let forwarder = IncidentForwarder::new(
        client,
        broker,
        config.credentials.clone(),
        config.incidents_url.clone(),
        Arc::new(StaticIncidentMapper::new(
            config.incident.clone(),
            config.item_id.clone(),
            config.entity.clone(),
        )),
    );
    let router = build_router(AppState {
        forwarder: Arc::new(forwarder),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %addr, error = %e, "Failed to bind webhook server");
            std::process::exit(1);
        }
    };

    info!("Room Telemetry Bridge running. Press Ctrl+C to stop.");
    if let Err(e) = serve(listener, router, shutdown_signal()).await {
        error!(error = %e, "Webhook server failed");
    }

    // Graceful shutdown
    info!("Initiating graceful shutdown...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, scheduler_handle).await {
        Ok(Ok(())) => info!("Cycle scheduler shut down gracefully"),
        Ok(Err(e)) => warn!(error = %e, "Cycle scheduler panicked during shutdown"),
        Err(_) => warn!("Cycle scheduler shutdown timed out after {:?}", SHUTDOWN_TIMEOUT),
    }

    if let Some(handle) = notifications_handle {
        handle.abort();
    }

    info!("Room Telemetry Bridge stopped");
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

/// Resolve when Ctrl+C is received.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, stopping..."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
