//! Webhook server.
//!
//! `POST /webhook` is called by the alerting source and forwards an incident;
//! `GET /health` is a liveness probe.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::incident::{IncidentError, IncidentForwarder};

#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<IncidentForwarder>,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/webhook", post(webhook))
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` completes.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Webhook server listening for alerts");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

// POST /webhook
async fn webhook(State(state): State<AppState>, body: Bytes) -> Response {
    info!("Webhook triggered");

    let trigger: Value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|e| {
            warn!(error = %e, "Webhook body is not JSON, ignoring it");
            Value::Null
        })
    };

    match state.forwarder.forward(&trigger).await {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageBody {
                message: "Incident sent",
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Webhook dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: error_message(&e),
                }),
            )
                .into_response()
        }
    }
}

fn error_message(err: &IncidentError) -> &'static str {
    match err {
        e if e.is_rejected() => "Failed sending incident",
        IncidentError::Auth(_) => "Authentication failed",
        IncidentError::Client(_) => "Internal server error",
    }
}
