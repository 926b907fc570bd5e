//! Device session abstraction.
//!
//! A session is a long-lived connection to a single room device. It offers
//! point-in-time reads of status attributes and push-based subscriptions to
//! attribute changes. Attributes are addressed by dotted paths such as
//! `RoomAnalytics.AmbientTemperature`.

pub mod xapi;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use xapi::XapiSession;

/// Errors returned by a device session.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device does not support, or could not return, this attribute.
    #[error("Attribute {path} unavailable: {reason}")]
    AttributeUnavailable { path: String, reason: String },

    /// The session itself cannot reach the device.
    #[error("Device session unreachable: {0}")]
    Unreachable(String),
}

impl DeviceError {
    pub fn unavailable(path: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::AttributeUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error affects the whole session rather than one attribute.
    pub fn is_systemic(&self) -> bool {
        matches!(self, DeviceError::Unreachable(_))
    }
}

/// A change notification for a subscribed attribute.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    /// Device that reported the change
    pub device_id: String,

    /// Dotted path of the attribute that changed
    pub path: String,

    /// New value of the attribute
    pub value: Value,

    /// Full notification as received from the platform
    pub raw: Value,
}

/// Callback invoked for every change of a subscribed attribute.
pub type StatusHandler = Arc<dyn Fn(StatusEvent) + Send + Sync>;

/// Point-in-time reads and change subscriptions against one device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Identifier of the device this session is bound to.
    fn device_id(&self) -> &str;

    /// Read the current value of an attribute.
    async fn read(&self, path: &str) -> Result<Value, DeviceError>;

    /// Register `handler` to be called whenever `path` changes.
    ///
    /// Handlers stay registered for the lifetime of the session.
    async fn subscribe(&self, path: &str, handler: StatusHandler) -> Result<(), DeviceError>;
}

/// Walk a dotted path through a JSON object.
///
/// Returns `None` if any segment is missing or the leaf is `null`.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}
