//! Configuration module for the room telemetry bridge.
//!
//! Everything is read from environment variables. Credentials and endpoint
//! URLs are taken as-is: a missing value becomes an empty string and shows up
//! later as a failed request rather than a startup error. Numeric settings are
//! validated the same way the rest of the service expects them.

use std::env;
use std::time::Duration;

use crate::incident::IncidentTemplate;

/// Default device platform API base URL
const DEFAULT_WEBEX_API_URL: &str = "https://webexapis.com/v1";

/// Default OAuth token endpoint of the device platform
const DEFAULT_OAUTH_URL: &str = "https://webexapis.com/v1/access_token";

/// Default reporting interval in seconds (five minutes)
const DEFAULT_REPORT_INTERVAL_SECS: u64 = 300;

/// Minimum reporting interval to avoid hammering the metrics API
const MIN_REPORT_INTERVAL_SECS: u64 = 10;

/// Maximum reporting interval, one day
const MAX_REPORT_INTERVAL_SECS: u64 = 86_400;

/// Default port for the webhook server
const DEFAULT_WEBHOOK_PORT: u16 = 3000;

/// Default HTTP request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Credentials used to exchange for a bearer token at the auth endpoint.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    pub username: String,
    pub password: String,
}

/// Settings for the device platform session.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    /// Identifier of the single device being bridged
    pub device_id: String,

    /// OAuth client id of the integration
    pub client_id: String,

    /// OAuth client secret of the integration
    pub client_secret: String,

    /// Long-lived refresh token issued when the integration was activated
    pub refresh_token: String,

    /// Public URL of this application as registered with the platform
    pub app_url: String,

    /// Base URL of the platform REST API (xAPI lives under it)
    pub api_url: String,

    /// OAuth token endpoint
    pub oauth_url: String,

    /// Long-poll URL delivering status notifications, if any
    pub notifications_url: Option<String>,
}

/// Configuration for the bridge service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Device platform settings
    pub device: DeviceConfig,

    /// API key sent as `x-api-key` on every call to the metrics platform
    pub api_key: String,

    /// Username/password exchanged for a bearer token
    pub credentials: StaticCredentials,

    /// Identifier of the monitored item (`ID` in metrics, correlation id in incidents)
    pub item_id: String,

    /// Owning entity (`Entity` in metrics, federation entity in incidents)
    pub entity: String,

    /// Authentication endpoint URL
    pub auth_url: String,

    /// Metrics ingestion endpoint URL
    pub metrics_url: String,

    /// Incidents endpoint URL
    pub incidents_url: String,

    /// Period between reporting cycles
    pub report_interval: Duration,

    /// Port the webhook server listens on
    pub webhook_port: u16,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Static incident fields sent by the webhook
    pub incident: IncidentTemplate,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `REPORT_INTERVAL_SECS` is not a valid number or is out of range
    /// - `WEBHOOK_PORT` is not a valid port
    /// - `REQUEST_TIMEOUT_SECS` is not a valid number or is zero
    /// - `INCIDENT_LATITUDE` / `INCIDENT_LONGITUDE` are not valid numbers
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use room_bridge::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Metrics URL: {}", config.metrics_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let device = DeviceConfig {
            device_id: string_var("DEVICE_ID"),
            client_id: string_var("CLIENT_ID"),
            client_secret: string_var("CLIENT_SECRET"),
            refresh_token: string_var("REFRESH_TOKEN"),
            app_url: string_var("APP_URL"),
            api_url: env::var("WEBEX_API_URL")
                .unwrap_or_else(|_| DEFAULT_WEBEX_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            oauth_url: env::var("OAUTH_URL").unwrap_or_else(|_| DEFAULT_OAUTH_URL.to_string()),
            notifications_url: env::var("NOTIFICATIONS_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
        };

        let report_interval = Duration::from_secs(Self::parse_report_interval()?);
        let webhook_port = Self::parse_webhook_port()?;
        let request_timeout = Duration::from_secs(Self::parse_request_timeout()?);
        let incident = Self::parse_incident_template()?;

        Ok(Self {
            device,
            api_key: string_var("X_API_KEY"),
            credentials: StaticCredentials {
                username: string_var("USERNAME"),
                password: string_var("PASSWORD"),
            },
            item_id: string_var("ITEM_ID"),
            entity: string_var("ENTITY"),
            auth_url: string_var("AUTH_URL"),
            metrics_url: string_var("METRICS_URL"),
            incidents_url: string_var("INCIDENTS_URL"),
            report_interval,
            webhook_port,
            request_timeout,
            incident,
        })
    }

    /// Parse the reporting interval from the environment with validation.
    fn parse_report_interval() -> Result<u64, ConfigError> {
        let env_var = "REPORT_INTERVAL_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let interval: u64 = value.trim().parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if interval < MIN_REPORT_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "report interval {} is below minimum ({}s)",
                            interval, MIN_REPORT_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                if interval > MAX_REPORT_INTERVAL_SECS {
                    return Err(ConfigError {
                        message: format!(
                            "report interval {} exceeds maximum ({}s)",
                            interval, MAX_REPORT_INTERVAL_SECS
                        ),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(interval)
            }
            Err(_) => Ok(DEFAULT_REPORT_INTERVAL_SECS),
        }
    }

    fn parse_webhook_port() -> Result<u16, ConfigError> {
        let env_var = "WEBHOOK_PORT";

        match env::var(env_var) {
            Ok(value) => {
                let port: u16 = value.trim().parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid port", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if port == 0 {
                    return Err(ConfigError {
                        message: "port must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(port)
            }
            Err(_) => Ok(DEFAULT_WEBHOOK_PORT),
        }
    }

    fn parse_request_timeout() -> Result<u64, ConfigError> {
        let env_var = "REQUEST_TIMEOUT_SECS";

        match env::var(env_var) {
            Ok(value) => {
                let secs: u64 = value.trim().parse().map_err(|_| ConfigError {
                    message: format!("'{}' is not a valid number", value),
                    env_var: Some(env_var.to_string()),
                })?;

                if secs == 0 {
                    return Err(ConfigError {
                        message: "request timeout must be greater than 0".to_string(),
                        env_var: Some(env_var.to_string()),
                    });
                }

                Ok(secs)
            }
            Err(_) => Ok(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Build the incident template, starting from the built-in values and
    /// applying any `INCIDENT_*` overrides.
    fn parse_incident_template() -> Result<IncidentTemplate, ConfigError> {
        let mut template = IncidentTemplate::default();

        if let Ok(value) = env::var("INCIDENT_CATEGORY") {
            template.category = value;
        }
        if let Ok(value) = env::var("INCIDENT_IMPACT") {
            template.impact = value;
        }
        if let Ok(value) = env::var("INCIDENT_URGENCY") {
            template.urgency = value;
        }
        if let Ok(value) = env::var("INCIDENT_DESCRIPTION") {
            template.description = value;
        }
        if let Ok(value) = env::var("INCIDENT_SHORT_DESCRIPTION") {
            template.short_description = value;
        }
        if let Ok(value) = env::var("INCIDENT_REPORTING_METHOD") {
            template.reporting_method = value;
        }
        if let Some(latitude) = parse_coordinate("INCIDENT_LATITUDE")? {
            template.latitude = latitude;
        }
        if let Some(longitude) = parse_coordinate("INCIDENT_LONGITUDE")? {
            template.longitude = longitude;
        }

        Ok(template)
    }
}

impl Default for Config {
    /// Create a configuration with default settings and empty credentials.
    ///
    /// Useful for tests; endpoints are expected to be filled in by the caller.
    fn default() -> Self {
        Self {
            device: DeviceConfig {
                api_url: DEFAULT_WEBEX_API_URL.to_string(),
                oauth_url: DEFAULT_OAUTH_URL.to_string(),
                ..DeviceConfig::default()
            },
            api_key: String::new(),
            credentials: StaticCredentials::default(),
            item_id: String::new(),
            entity: String::new(),
            auth_url: String::new(),
            metrics_url: String::new(),
            incidents_url: String::new(),
            report_interval: Duration::from_secs(DEFAULT_REPORT_INTERVAL_SECS),
            webhook_port: DEFAULT_WEBHOOK_PORT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            incident: IncidentTemplate::default(),
        }
    }
}

/// Read a string variable, treating absence as empty.
fn string_var(key: &str) -> String {
    env::var(key).unwrap_or_default()
}

fn parse_coordinate(env_var: &str) -> Result<Option<f64>, ConfigError> {
    match env::var(env_var) {
        Ok(value) => value
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ConfigError {
                message: format!("'{}' is not a valid coordinate", value),
                env_var: Some(env_var.to_string()),
            }),
        Err(_) => Ok(None),
    }
}

/// Whether `.env` files should be loaded, i.e. we are not running in production.
pub fn load_dotenv_allowed() -> bool {
    let production = |key: &str| {
        env::var(key)
            .map(|v| v.eq_ignore_ascii_case("production"))
            .unwrap_or(false)
    };
    !(production("NODE_ENV") || production("APP_ENV"))
}
