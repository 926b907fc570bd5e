//! Sensor collection.
//!
//! Reads a fixed set of room analytics attributes from a device session into
//! a [`SensorSnapshot`]. Attributes the device cannot provide keep their
//! defaults; only a session-level failure aborts the collection.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tracing::{debug, warn};

use crate::device::{DeviceError, DeviceSession};

/// Room occupancy as reported by the presence sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    Occupied,
    Free,
    #[default]
    Unknown,
}

impl Presence {
    /// Classify a raw presence value. Only the exact strings `"Yes"` and
    /// `"No"` are a reading; `"Unknown"` and anything else stay unknown.
    pub fn classify(value: &Value) -> Self {
        match value.as_str() {
            Some("Yes") => Presence::Occupied,
            Some("No") => Presence::Free,
            _ => Presence::Unknown,
        }
    }

    /// Wire value used by the metrics platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            Presence::Occupied => "Yes",
            Presence::Free => "No",
            Presence::Unknown => "",
        }
    }
}

impl std::fmt::Display for Presence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Presence::Occupied => write!(f, "occupied"),
            Presence::Free => write!(f, "free"),
            Presence::Unknown => write!(f, "unknown"),
        }
    }
}

impl Serialize for Presence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Attributes read by the collector, in read order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorAttribute {
    AmbientTemperature,
    RelativeHumidity,
    SoundLevel,
    PeoplePresence,
    PeopleCount,
    Capacity,
}

impl SensorAttribute {
    /// All attributes in the order they are read.
    pub fn all() -> &'static [SensorAttribute] {
        &[
            SensorAttribute::AmbientTemperature,
            SensorAttribute::RelativeHumidity,
            SensorAttribute::SoundLevel,
            SensorAttribute::PeoplePresence,
            SensorAttribute::PeopleCount,
            SensorAttribute::Capacity,
        ]
    }

    /// Dotted status path on the device.
    pub fn path(&self) -> &'static str {
        match self {
            SensorAttribute::AmbientTemperature => "RoomAnalytics.AmbientTemperature",
            SensorAttribute::RelativeHumidity => "RoomAnalytics.RelativeHumidity",
            SensorAttribute::SoundLevel => "RoomAnalytics.Sound.Level.A",
            SensorAttribute::PeoplePresence => "RoomAnalytics.PeoplePresence",
            SensorAttribute::PeopleCount => "RoomAnalytics.PeopleCount.Current",
            SensorAttribute::Capacity => "RoomAnalytics.PeopleCount.Capacity",
        }
    }
}

/// Air quality index path. Not every device model has the sensor, so it is
/// never read.
pub const AIR_QUALITY_PATH: &str = "RoomAnalytics.AirQuality.Index";

/// Ambient noise path. Fails on several device models, so it is never read.
pub const AMBIENT_NOISE_PATH: &str = "RoomAnalytics.AmbientNoise.Level.A";

/// Serialize an absent reading as an empty string.
fn empty_if_none<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.serialize_f64(*v),
        None => serializer.serialize_str(""),
    }
}

/// Point-in-time set of sensor readings from one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSnapshot {
    /// Ambient temperature in °C
    #[serde(serialize_with = "empty_if_none")]
    pub temperature: Option<f64>,

    /// Relative humidity in %
    pub humidity: f64,

    /// Air quality index
    #[serde(serialize_with = "empty_if_none")]
    pub air_quality: Option<f64>,

    /// A-weighted ambient noise in dB
    #[serde(serialize_with = "empty_if_none")]
    pub ambient_noise: Option<f64>,

    /// A-weighted sound level in dB
    pub sound_level: f64,

    /// Whether people are detected in the room
    pub presence: Presence,

    /// Current number of people detected
    pub people_count: i64,

    /// Configured room capacity
    pub capacity: i64,

    /// When the snapshot was taken
    #[serde(skip)]
    pub collected_at: DateTime<Utc>,
}

impl Default for SensorSnapshot {
    fn default() -> Self {
        Self {
            temperature: None,
            humidity: 0.0,
            air_quality: None,
            ambient_noise: None,
            sound_level: 0.0,
            presence: Presence::Unknown,
            people_count: 0,
            capacity: 0,
            collected_at: Utc::now(),
        }
    }
}

impl SensorSnapshot {
    /// Fold per-attribute read results into a snapshot.
    ///
    /// Unavailable or unparseable attributes keep their default. A systemic
    /// session error anywhere in the list fails the whole fold.
    pub fn from_readings<I>(readings: I) -> Result<Self, DeviceError>
    where
        I: IntoIterator<Item = (SensorAttribute, Result<Value, DeviceError>)>,
    {
        let mut snapshot = SensorSnapshot::default();

        for (attribute, result) in readings {
            match result {
                Ok(value) => {
                    if !snapshot.apply(attribute, &value) {
                        warn!(
                            path = attribute.path(),
                            value = %value,
                            "Unexpected sensor value, keeping default"
                        );
                    }
                }
                Err(e) if e.is_systemic() => return Err(e),
                Err(e) => {
                    warn!(path = attribute.path(), error = %e, "Sensor unavailable, keeping default");
                }
            }
        }

        Ok(snapshot)
    }

    /// Store one reading. Returns `false` if the value has the wrong shape.
    fn apply(&mut self, attribute: SensorAttribute, value: &Value) -> bool {
        match attribute {
            SensorAttribute::AmbientTemperature => as_number(value)
                .map(|v| self.temperature = Some(v))
                .is_some(),
            SensorAttribute::RelativeHumidity => {
                as_number(value).map(|v| self.humidity = v).is_some()
            }
            SensorAttribute::SoundLevel => {
                as_number(value).map(|v| self.sound_level = v).is_some()
            }
            SensorAttribute::PeoplePresence => {
                self.presence = Presence::classify(value);
                // The device reports "Unknown" when it has no presence data
                self.presence != Presence::Unknown || value.as_str() == Some("Unknown")
            }
            SensorAttribute::PeopleCount => {
                as_integer(value).map(|v| self.people_count = v).is_some()
            }
            SensorAttribute::Capacity => as_integer(value).map(|v| self.capacity = v).is_some(),
        }
    }
}

/// Accept JSON numbers and numeric strings; devices report both.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read all sensor attributes from the session into a snapshot.
///
/// Stops at the first systemic error: there is no point in querying the
/// remaining attributes of a device we cannot reach.
///
/// # Errors
///
/// Returns `DeviceError::Unreachable` if the session is down.
pub async fn collect(session: &dyn DeviceSession) -> Result<SensorSnapshot, DeviceError> {
    let mut readings = Vec::with_capacity(SensorAttribute::all().len());

    for &attribute in SensorAttribute::all() {
        match session.read(attribute.path()).await {
            Err(e) if e.is_systemic() => return Err(e),
            result => readings.push((attribute, result)),
        }
    }

    let snapshot = SensorSnapshot::from_readings(readings)?;
    debug!(
        device_id = %session.device_id(),
        skipped = ?[AIR_QUALITY_PATH, AMBIENT_NOISE_PATH],
        "Sensor snapshot collected"
    );
    Ok(snapshot)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory device session for tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use crate::device::{DeviceError, DeviceSession, StatusEvent, StatusHandler};

    #[derive(Default)]
    pub struct FakeSession {
        pub device_id: String,
        pub values: HashMap<String, Value>,
        pub unreachable: bool,
        pub reads: Mutex<Vec<String>>,
        pub handlers: Mutex<Vec<(String, StatusHandler)>>,
    }

    impl FakeSession {
        pub fn with_values(values: &[(&str, Value)]) -> Self {
            Self {
                device_id: "device-1".to_string(),
                values: values
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                ..Self::default()
            }
        }

        /// Push a change to every handler subscribed to `path`.
        pub fn emit(&self, path: &str, value: Value) {
            let handlers: Vec<StatusHandler> = self
                .handlers
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, h)| h.clone())
                .collect();
            for handler in handlers {
                handler(StatusEvent {
                    device_id: self.device_id.clone(),
                    path: path.to_string(),
                    value: value.clone(),
                    raw: Value::Null,
                });
            }
        }
    }

    #[async_trait]
    impl DeviceSession for FakeSession {
        fn device_id(&self) -> &str {
            &self.device_id
        }

        async fn read(&self, path: &str) -> Result<Value, DeviceError> {
            self.reads.lock().unwrap().push(path.to_string());
            if self.unreachable {
                return Err(DeviceError::Unreachable("device offline".to_string()));
            }
            self.values
                .get(path)
                .cloned()
                .ok_or_else(|| DeviceError::unavailable(path, "not supported"))
        }

        async fn subscribe(&self, path: &str, handler: StatusHandler) -> Result<(), DeviceError> {
            self.handlers
                .lock()
                .unwrap()
                .push((path.to_string(), handler));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeSession;
    use super::*;
    use serde_json::json;

    fn room_values() -> FakeSession {
        FakeSession::with_values(&[
            ("RoomAnalytics.AmbientTemperature", json!(21.5)),
            ("RoomAnalytics.RelativeHumidity", json!(45)),
            ("RoomAnalytics.Sound.Level.A", json!(38)),
            ("RoomAnalytics.PeoplePresence", json!("Yes")),
            ("RoomAnalytics.PeopleCount.Current", json!(3)),
            ("RoomAnalytics.PeopleCount.Capacity", json!(8)),
        ])
    }

    #[test]
    fn test_presence_classification() {
        assert_eq!(Presence::classify(&json!("Yes")), Presence::Occupied);
        assert_eq!(Presence::classify(&json!("No")), Presence::Free);
        assert_eq!(Presence::classify(&json!("Unknown")), Presence::Unknown);
        assert_eq!(Presence::classify(&json!("yes")), Presence::Unknown);
        assert_eq!(Presence::classify(&json!(42)), Presence::Unknown);
        assert_eq!(Presence::Occupied.as_str(), "Yes");
        assert_eq!(Presence::Unknown.as_str(), "");
    }

    #[test]
    fn test_attribute_order() {
        let paths: Vec<&str> = SensorAttribute::all().iter().map(|a| a.path()).collect();
        assert_eq!(
            paths,
            vec![
                "RoomAnalytics.AmbientTemperature",
                "RoomAnalytics.RelativeHumidity",
                "RoomAnalytics.Sound.Level.A",
                "RoomAnalytics.PeoplePresence",
                "RoomAnalytics.PeopleCount.Current",
                "RoomAnalytics.PeopleCount.Capacity",
            ]
        );
    }

    #[test]
    fn test_fold_keeps_defaults_for_failed_attributes() {
        let readings = vec![
            (
                SensorAttribute::AmbientTemperature,
                Err(DeviceError::unavailable("RoomAnalytics.AmbientTemperature", "n/a")),
            ),
            (SensorAttribute::RelativeHumidity, Ok(json!(51.0))),
            (SensorAttribute::SoundLevel, Ok(json!("not a number"))),
            (
                SensorAttribute::PeoplePresence,
                Err(DeviceError::unavailable("RoomAnalytics.PeoplePresence", "n/a")),
            ),
            (SensorAttribute::PeopleCount, Ok(json!("4"))),
            (
                SensorAttribute::Capacity,
                Err(DeviceError::unavailable("RoomAnalytics.PeopleCount.Capacity", "n/a")),
            ),
        ];

        let snapshot = SensorSnapshot::from_readings(readings).unwrap();
        assert_eq!(snapshot.temperature, None);
        assert_eq!(snapshot.humidity, 51.0);
        assert_eq!(snapshot.sound_level, 0.0);
        assert_eq!(snapshot.presence, Presence::Unknown);
        assert_eq!(snapshot.people_count, 4);
        assert_eq!(snapshot.capacity, 0);
    }

    #[test]
    fn test_unknown_presence_is_not_reported_as_free() {
        let readings = vec![(SensorAttribute::PeoplePresence, Ok(json!("Unknown")))];

        let snapshot = SensorSnapshot::from_readings(readings).unwrap();
        assert_eq!(snapshot.presence, Presence::Unknown);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["presence"], json!(""));
    }

    #[test]
    fn test_fold_fails_on_systemic_error() {
        let readings = vec![
            (SensorAttribute::AmbientTemperature, Ok(json!(20.0))),
            (
                SensorAttribute::RelativeHumidity,
                Err(DeviceError::Unreachable("socket closed".to_string())),
            ),
        ];

        let result = SensorSnapshot::from_readings(readings);
        assert!(matches!(result, Err(DeviceError::Unreachable(_))));
    }

    #[test]
    fn test_all_attributes_failing_still_yields_snapshot() {
        let readings = SensorAttribute::all().iter().map(|&a| {
            (a, Err::<Value, _>(DeviceError::unavailable(a.path(), "not supported")))
        });

        let snapshot = SensorSnapshot::from_readings(readings).unwrap();
        let defaults = SensorSnapshot::default();
        assert_eq!(snapshot.temperature, defaults.temperature);
        assert_eq!(snapshot.humidity, defaults.humidity);
        assert_eq!(snapshot.presence, defaults.presence);
        assert_eq!(snapshot.people_count, defaults.people_count);
    }

    #[test]
    fn test_snapshot_serializes_missing_values_as_empty() {
        let snapshot = SensorSnapshot::default();
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["temperature"], json!(""));
        assert_eq!(json["airQuality"], json!(""));
        assert_eq!(json["ambientNoise"], json!(""));
        assert_eq!(json["presence"], json!(""));
        assert_eq!(json["humidity"], json!(0.0));
        assert_eq!(json["peopleCount"], json!(0));
        assert!(json.get("collectedAt").is_none());
    }

    #[tokio::test]
    async fn test_collect_room_scenario() {
        let session = room_values();

        let snapshot = collect(&session).await.unwrap();
        assert_eq!(snapshot.temperature, Some(21.5));
        assert_eq!(snapshot.humidity, 45.0);
        assert_eq!(snapshot.sound_level, 38.0);
        assert_eq!(snapshot.presence, Presence::Occupied);
        assert_eq!(snapshot.people_count, 3);
        assert_eq!(snapshot.capacity, 8);
        assert_eq!(snapshot.air_quality, None);
        assert_eq!(snapshot.ambient_noise, None);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["airQuality"], json!(""));
        assert_eq!(json["ambientNoise"], json!(""));
    }

    #[tokio::test]
    async fn test_collect_never_queries_optional_sensors() {
        let session = room_values();
        collect(&session).await.unwrap();

        let reads = session.reads.lock().unwrap();
        assert_eq!(reads.len(), 6);
        assert!(!reads.iter().any(|p| p == AIR_QUALITY_PATH));
        assert!(!reads.iter().any(|p| p == AMBIENT_NOISE_PATH));
    }

    #[tokio::test]
    async fn test_collect_tolerates_unsupported_attributes() {
        let session = FakeSession::with_values(&[
            ("RoomAnalytics.PeoplePresence", json!("No")),
            ("RoomAnalytics.PeopleCount.Current", json!(0)),
        ]);

        let snapshot = collect(&session).await.unwrap();
        assert_eq!(snapshot.temperature, None);
        assert_eq!(snapshot.humidity, 0.0);
        assert_eq!(snapshot.presence, Presence::Free);
        assert_eq!(session.reads.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_collect_aborts_when_session_unreachable() {
        let session = FakeSession {
            unreachable: true,
            ..room_values()
        };

        let result = collect(&session).await;
        assert!(matches!(result, Err(DeviceError::Unreachable(_))));
        // Stops after the first systemic failure
        assert_eq!(session.reads.lock().unwrap().len(), 1);
    }
}
