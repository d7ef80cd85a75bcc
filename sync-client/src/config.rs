//! Configuration for a sync session.
//!
//! Configuration is loaded from a TOML file or built in code. Every field
//! has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [session]
//! display_name = "stage left"
//!
//! [clock]
//! window = 8
//!
//! [beacon]
//! interval_ms = 125
//!
//! [schedule]
//! output_latency_ns = 5000000
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wist_sync_core::CorrelatorSettings;

/// Root configuration for a sync session.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    /// Session identity and discovery.
    #[serde(default)]
    pub session: SessionConfig,
    /// Clock correlation tunables.
    #[serde(default)]
    pub clock: CorrelatorSettings,
    /// Beacon (clock sampling) configuration.
    #[serde(default)]
    pub beacon: BeaconConfig,
    /// Command scheduling configuration.
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Session identity and discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Human-readable device name (default: "wist device").
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Discovery service type (default: "wist-service").
    #[serde(default = "default_service_type")]
    pub service_type: String,
}

/// Beacon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BeaconConfig {
    /// Interval between beacons from a slave to its master (default: 125ms).
    #[serde(default = "default_beacon_interval_ms")]
    pub interval_ms: u64,
    /// Samples with a one-way delay at or above this are discarded
    /// (default: 4s).
    #[serde(default = "default_max_one_way_ns")]
    pub max_one_way_ns: u64,
}

/// Command scheduling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Local audio output latency in nanoseconds (default: 0).
    #[serde(default)]
    pub output_latency_ns: u64,
    /// User-chosen extra delay in nanoseconds (default: 0).
    #[serde(default)]
    pub extra_delay_ns: u64,
    /// Minimum distance between a request and the scheduled instant
    /// (default: 10ms).
    #[serde(default = "default_min_lead_ns")]
    pub min_lead_ns: u64,
}

// Default value functions
fn default_display_name() -> String {
    "wist device".to_string()
}

fn default_service_type() -> String {
    "wist-service".to_string()
}

fn default_beacon_interval_ms() -> u64 {
    125 // 1/8 s
}

fn default_max_one_way_ns() -> u64 {
    4_000_000_000 // 4s
}

fn default_min_lead_ns() -> u64 {
    10_000_000 // 10ms
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            service_type: default_service_type(),
        }
    }
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_beacon_interval_ms(),
            max_one_way_ns: default_max_one_way_ns(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            output_latency_ns: 0,
            extra_delay_ns: 0,
            min_lead_ns: default_min_lead_ns(),
        }
    }
}

impl BeaconConfig {
    /// Beacon interval as a [`Duration`], never shorter than 1ms.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.display_name.trim().is_empty() {
            return Err(ConfigError::Invalid("session.display_name is empty".into()));
        }
        if !is_valid_service_type(&self.session.service_type) {
            return Err(ConfigError::Invalid(format!(
                "session.service_type {:?} must be 1-15 lowercase letters, digits or hyphens",
                self.session.service_type
            )));
        }
        if self.clock.window == 0 {
            return Err(ConfigError::Invalid("clock.window must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.clock.confidence_threshold) {
            return Err(ConfigError::Invalid(
                "clock.confidence_threshold must be within [0, 1]".into(),
            ));
        }
        if self.beacon.interval_ms == 0 {
            return Err(ConfigError::Invalid("beacon.interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: &str) -> Self {
        self.session.display_name = name.to_string();
        self
    }

    /// Set the local audio output latency.
    pub fn with_output_latency(mut self, nanos: u64) -> Self {
        self.schedule.output_latency_ns = nanos;
        self
    }

    /// Set the user extra delay.
    pub fn with_extra_delay(mut self, nanos: u64) -> Self {
        self.schedule.extra_delay_ns = nanos;
        self
    }

    /// Set the beacon interval.
    pub fn with_beacon_interval(mut self, interval: Duration) -> Self {
        self.beacon.interval_ms = interval.as_millis().max(1) as u64;
        self
    }
}

fn is_valid_service_type(service_type: &str) -> bool {
    (1..=15).contains(&service_type.len())
        && service_type
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !service_type.starts_with('-')
        && !service_type.ends_with('-')
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.session.service_type, "wist-service");
        assert_eq!(config.beacon.interval_ms, 125);
        assert_eq!(config.beacon.max_one_way_ns, 4_000_000_000);
        assert_eq!(config.clock.window, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[session]
display_name = "stage left"

[clock]
window = 16
confidence_threshold = 0.75

[beacon]
interval_ms = 250

[schedule]
output_latency_ns = 5000000
extra_delay_ns = 20000000
"#;

        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.session.display_name, "stage left");
        assert_eq!(config.session.service_type, "wist-service");
        assert_eq!(config.clock.window, 16);
        assert_eq!(config.clock.confidence_threshold, 0.75);
        assert_eq!(config.beacon.interval(), Duration::from_millis(250));
        assert_eq!(config.schedule.output_latency_ns, 5_000_000);
        assert_eq!(config.schedule.extra_delay_ns, 20_000_000);
        assert_eq!(config.schedule.min_lead_ns, 10_000_000);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config.session.display_name, "wist device");
        assert_eq!(config.schedule.output_latency_ns, 0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for toml in [
            "[beacon]\ninterval_ms = 0",
            "[clock]\nconfidence_threshold = 1.5",
            "[clock]\nwindow = 0",
            "[session]\nservice_type = \"Not_Valid\"",
            "[session]\nservice_type = \"much-too-long-service\"",
            "[session]\ndisplay_name = \"  \"",
        ] {
            let result = SyncConfig::from_toml_str(toml);
            assert!(
                matches!(result, Err(ConfigError::Invalid(_))),
                "{} should be invalid",
                toml
            );
        }
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let result = SyncConfig::from_toml_str("[beacon\ninterval_ms = ");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn missing_file_is_read_error() {
        let result = SyncConfig::from_file(Path::new("/nonexistent/wist.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn zero_interval_is_clamped_for_the_timer() {
        let beacon = BeaconConfig {
            interval_ms: 0,
            ..BeaconConfig::default()
        };
        assert_eq!(beacon.interval(), Duration::from_millis(1));
    }

    #[test]
    fn builders_set_fields() {
        let config = SyncConfig::default()
            .with_display_name("drums")
            .with_output_latency(3)
            .with_extra_delay(4)
            .with_beacon_interval(Duration::from_millis(50));
        assert_eq!(config.session.display_name, "drums");
        assert_eq!(config.schedule.output_latency_ns, 3);
        assert_eq!(config.schedule.extra_delay_ns, 4);
        assert_eq!(config.beacon.interval_ms, 50);
    }
}
