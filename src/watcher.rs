//! Occupancy watcher.
//!
//! Logs every people-presence change pushed by the device. It is purely for
//! observability and never touches the reporting pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::collector::Presence;
use crate::device::{DeviceError, DeviceSession, StatusEvent};

/// Status path of the people-presence sensor.
pub const PRESENCE_PATH: &str = "RoomAnalytics.PeoplePresence";

/// Counts of presence changes seen since startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyStats {
    pub occupied: u64,
    pub free: u64,
}

/// Subscribes to people-presence changes and logs them.
#[derive(Debug, Default)]
pub struct OccupancyWatcher {
    occupied: AtomicU64,
    free: AtomicU64,
}

impl OccupancyWatcher {
    /// Subscribe a new watcher to `session`.
    ///
    /// # Errors
    ///
    /// Returns the session error if the subscription cannot be set up.
    pub async fn register(session: &dyn DeviceSession) -> Result<Arc<Self>, DeviceError> {
        let watcher = Arc::new(Self::default());
        let handler_watcher = Arc::clone(&watcher);

        session
            .subscribe(
                PRESENCE_PATH,
                Arc::new(move |event: StatusEvent| {
                    handler_watcher.on_change(&event);
                }),
            )
            .await?;

        info!(path = PRESENCE_PATH, "Listening for people presence changes");
        Ok(watcher)
    }

    /// Classify and log one presence change.
    pub fn on_change(&self, event: &StatusEvent) -> Presence {
        info!(device_id = %event.device_id, value = %event.value, "Change in people presence");

        // Anything that is not "Yes" counts as free
        let presence = match Presence::classify(&event.value) {
            Presence::Occupied => Presence::Occupied,
            _ => Presence::Free,
        };

        match presence {
            Presence::Occupied => {
                self.occupied.fetch_add(1, Ordering::Relaxed);
                info!(device_id = %event.device_id, "Room with device {} is occupied", event.device_id);
            }
            _ => {
                self.free.fetch_add(1, Ordering::Relaxed);
                info!(device_id = %event.device_id, "Room with device {} is free", event.device_id);
            }
        }

        presence
    }

    pub fn stats(&self) -> OccupancyStats {
        OccupancyStats {
            occupied: self.occupied.load(Ordering::Relaxed),
            free: self.free.load(Ordering::Relaxed),
        }
    }
}
