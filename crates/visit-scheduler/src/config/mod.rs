use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub scheduling: SchedulingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let include_targets = environment == AppEnvironment::Development;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig {
                log_level,
                include_targets,
            },
            scheduling: SchedulingConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub include_targets: bool,
}

/// Engine-wide scheduling knobs shared by the state machine and the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulingConfig {
    /// Length of every visiting slot, in minutes.
    pub slot_minutes: u16,
    /// Offset used to decide which calendar date is "today".
    pub utc_offset: FixedOffset,
    /// Whether the user who booked a visit may move it without agency rights.
    pub originator_may_reschedule: bool,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            slot_minutes: 60,
            utc_offset: Utc.fix(),
            originator_may_reschedule: false,
        }
    }
}

impl SchedulingConfig {
    pub const MAX_SLOT_MINUTES: u16 = 24 * 60;

    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let slot_minutes = match env::var("SCHEDULER_SLOT_MINUTES") {
            Ok(raw) => raw
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|minutes| (1..=Self::MAX_SLOT_MINUTES).contains(minutes))
                .ok_or(ConfigError::InvalidSlotMinutes)?,
            Err(_) => defaults.slot_minutes,
        };

        let utc_offset = match env::var("SCHEDULER_UTC_OFFSET_MINUTES") {
            Ok(raw) => raw
                .trim()
                .parse::<i32>()
                .ok()
                .and_then(|minutes| minutes.checked_mul(60))
                .and_then(FixedOffset::east_opt)
                .ok_or(ConfigError::InvalidUtcOffset)?,
            Err(_) => defaults.utc_offset,
        };

        let originator_may_reschedule = match env::var("SCHEDULER_ORIGINATOR_MAY_RESCHEDULE") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag {
                key: "SCHEDULER_ORIGINATOR_MAY_RESCHEDULE",
            })?,
            Err(_) => defaults.originator_may_reschedule,
        };

        Ok(Self {
            slot_minutes,
            utc_offset,
            originator_may_reschedule,
        })
    }

    pub fn slot_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.slot_minutes))
    }

    /// Calendar date of `now` in the configured offset.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.utc_offset).date_naive()
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidSlotMinutes,
    InvalidUtcOffset,
    InvalidFlag { key: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSlotMinutes => write!(
                f,
                "SCHEDULER_SLOT_MINUTES must be between 1 and {}",
                SchedulingConfig::MAX_SLOT_MINUTES
            ),
            ConfigError::InvalidUtcOffset => write!(
                f,
                "SCHEDULER_UTC_OFFSET_MINUTES must be a whole number of minutes within one day"
            ),
            ConfigError::InvalidFlag { key } => write!(f, "{key} must be true or false"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidSlotMinutes
            | ConfigError::InvalidUtcOffset
            | ConfigError::InvalidFlag { .. } => None,
        }
    }
}
