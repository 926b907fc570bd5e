//! Device session backed by the platform's cloud xAPI.
//!
//! Reads go through `GET /xapi/status`; change notifications arrive on a
//! long-poll URL and are fanned out to the registered handlers. The session
//! owns its platform access token (refresh-token grant) and renews it when it
//! gets close to expiry, so callers only ever see `Unreachable` when the
//! platform itself cannot be reached.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{lookup_path, DeviceError, DeviceSession, StatusEvent, StatusHandler};
use crate::config::DeviceConfig;

/// Renew the platform token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Token lifetime assumed when the OAuth response does not say.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// How long a single long-poll request may stay open.
const LONG_POLL_TIMEOUT: Duration = Duration::from_secs(90);

/// Minimum spacing between long-poll requests when the server answers early.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Base delay before reconnecting the notification stream (in milliseconds).
const RECONNECT_BASE_DELAY_MS: u64 = 1_000;

/// Maximum delay between reconnect attempts (in milliseconds).
const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

#[derive(Debug, Deserialize)]
struct OAuthResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct PlatformToken {
    access_token: String,
    expires_at: Instant,
}

impl PlatformToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Default, Deserialize)]
struct PollResponse {
    #[serde(default)]
    messages: Vec<Value>,
}

/// Session against a single device through the cloud xAPI.
pub struct XapiSession {
    client: Client,
    config: DeviceConfig,
    token: Mutex<Option<PlatformToken>>,
    handlers: RwLock<HashMap<String, Vec<StatusHandler>>>,
}

impl XapiSession {
    /// Create a session without contacting the platform.
    pub fn new(client: Client, config: DeviceConfig) -> Self {
        Self {
            client,
            config,
            token: Mutex::new(None),
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session and verify the platform accepts our credentials.
    ///
    /// # Errors
    ///
    /// Returns `DeviceError::Unreachable` if the token exchange fails.
    pub async fn connect(client: Client, config: DeviceConfig) -> Result<Arc<Self>, DeviceError> {
        let session = Self::new(client, config);
        session.access_token().await?;
        info!(
            device_id = %session.config.device_id,
            app_url = %session.config.app_url,
            "Device session established"
        );
        Ok(Arc::new(session))
    }

    /// Return a usable platform access token, refreshing it if needed.
    async fn access_token(&self) -> Result<String, DeviceError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        let token = self.exchange_refresh_token().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn exchange_refresh_token(&self) -> Result<PlatformToken, DeviceError> {
        debug!(url = %self.config.oauth_url, "Refreshing platform access token");

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
        ];

        let response = self
            .client
            .post(&self.config.oauth_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| DeviceError::Unreachable(format!("token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::Unreachable(format!(
                "token exchange rejected with status {}",
                status
            )));
        }

        let body: OAuthResponse = response
            .json()
            .await
            .map_err(|e| DeviceError::Unreachable(format!("invalid token response: {}", e)))?;

        let lifetime = body.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Ok(PlatformToken {
            access_token: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        })
    }

    /// Start the long-poll loop that feeds subscriptions.
    ///
    /// Returns `None` when no notification URL is configured.
    pub fn start_notifications(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let url = self.config.notifications_url.clone()?;
        let session = Arc::clone(self);

        Some(tokio::spawn(async move {
            info!(url = %url, "Notification stream started");
            let mut failures: u32 = 0;

            loop {
                let started = Instant::now();
                tokio::select! {
                    result = session.poll_once(&url) => match result {
                        Ok(dispatched) => {
                            failures = 0;
                            if dispatched > 0 {
                                debug!(dispatched = dispatched, "Dispatched status notifications");
                            }
                            if let Some(pause) = poll_pause(started.elapsed()) {
                                tokio::select! {
                                    _ = tokio::time::sleep(pause) => {}
                                    _ = shutdown.changed() => break,
                                }
                            }
                        }
                        Err(e) => {
                            failures = failures.saturating_add(1);
                            let delay = reconnect_delay(failures);
                            warn!(
                                error = %e,
                                failures = failures,
                                delay_ms = delay.as_millis(),
                                "Notification stream interrupted, reconnecting"
                            );
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = shutdown.changed() => break,
                            }
                        }
                    },
                    _ = shutdown.changed() => break,
                }
            }

            info!("Notification stream stopped");
        }))
    }

    /// Perform one long-poll request and dispatch what it returns.
    async fn poll_once(&self, url: &str) -> Result<usize, DeviceError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(LONG_POLL_TIMEOUT)
            .send()
            .await
            .map_err(|e| DeviceError::Unreachable(format!("long poll failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }
        if !status.is_success() {
            return Err(DeviceError::Unreachable(format!(
                "long poll returned status {}",
                status
            )));
        }

        let body: PollResponse = response
            .json()
            .await
            .map_err(|e| DeviceError::Unreachable(format!("invalid notification body: {}", e)))?;

        Ok(body.messages.iter().map(|m| self.dispatch(m)).sum())
    }

    /// Deliver one notification to every handler whose path changed.
    ///
    /// Accepts either the bare message or one wrapped in `{"message": ...}`.
    /// Returns the number of handler invocations.
    pub fn dispatch(&self, notification: &Value) -> usize {
        let message = notification.get("message").unwrap_or(notification);

        if message.get("type").and_then(Value::as_str) != Some("status") {
            return 0;
        }

        let device_id = message
            .get("deviceId")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if device_id != self.config.device_id {
            debug!(device_id = %device_id, "Ignoring notification for another device");
            return 0;
        }

        let Some(updated) = message.get("changes").and_then(|c| c.get("updated")) else {
            return 0;
        };

        // Clone out of the lock so handlers may subscribe without deadlocking
        let matches: Vec<(String, Value, Vec<StatusHandler>)> = {
            let handlers = match self.handlers.read() {
                Ok(handlers) => handlers,
                Err(poisoned) => poisoned.into_inner(),
            };
            handlers
                .iter()
                .filter_map(|(path, list)| {
                    lookup_path(updated, path).map(|v| (path.clone(), v.clone(), list.clone()))
                })
                .collect()
        };

        let mut invoked = 0;
        for (path, value, list) in matches {
            for handler in list {
                handler(StatusEvent {
                    device_id: device_id.to_string(),
                    path: path.clone(),
                    value: value.clone(),
                    raw: notification.clone(),
                });
                invoked += 1;
            }
        }
        invoked
    }
}

#[async_trait]
impl DeviceSession for XapiSession {
    fn device_id(&self) -> &str {
        &self.config.device_id
    }

    async fn read(&self, path: &str) -> Result<Value, DeviceError> {
        let token = self.access_token().await?;
        let url = format!("{}/xapi/status", self.config.api_url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("deviceId", self.config.device_id.as_str()), ("name", path)])
            .send()
            .await
            .map_err(|e| DeviceError::Unreachable(format!("status read failed: {}", e)))?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| DeviceError::unavailable(path, format!("invalid body: {}", e)))?;
                let result = body.get("result").unwrap_or(&body);
                lookup_path(result, path)
                    .cloned()
                    .ok_or_else(|| DeviceError::unavailable(path, "not reported by device"))
            }
            StatusCode::UNAUTHORIZED => {
                self.invalidate_token().await;
                Err(DeviceError::Unreachable(
                    "platform rejected access token".to_string(),
                ))
            }
            s if s.is_client_error() => Err(DeviceError::unavailable(
                path,
                format!("device returned status {}", s),
            )),
            s => Err(DeviceError::Unreachable(format!(
                "status read returned {}",
                s
            ))),
        }
    }

    async fn subscribe(&self, path: &str, handler: StatusHandler) -> Result<(), DeviceError> {
        if self.config.notifications_url.is_none() {
            warn!(
                path = %path,
                "No notification URL configured, subscription will not receive events"
            );
        }

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| DeviceError::Unreachable("handler registry poisoned".to_string()))?;
        handlers.entry(path.to_string()).or_default().push(handler);

        debug!(path = %path, "Subscribed to status changes");
        Ok(())
    }
}

/// Time to wait before the next poll when the last one returned after `elapsed`.
fn poll_pause(elapsed: Duration) -> Option<Duration> {
    MIN_POLL_INTERVAL
        .checked_sub(elapsed)
        .filter(|pause| !pause.is_zero())
}

/// Exponential reconnect delay with up to 25% jitter.
fn reconnect_delay(failures: u32) -> Duration {
    let exponential = RECONNECT_BASE_DELAY_MS.saturating_mul(1 << failures.min(10));
    let jitter = rand::thread_rng().gen_range(0..=exponential / 4);
    Duration::from_millis(exponential.saturating_add(jitter).min(MAX_RECONNECT_DELAY_MS))
}
