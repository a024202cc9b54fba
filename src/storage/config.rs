//! Application configuration.
//!
//! Stored as TOML in the platform data directory. Every section falls back to
//! its defaults, so a partial file (or none at all) is valid.

use crate::sensors::types::ReconnectPolicy;
use crate::world::physics::PhysicsModel;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Data directory path
    #[serde(skip)]
    pub data_dir: PathBuf,
    /// Rider and bike
    pub rider: RiderSettings,
    /// Trainer link settings
    pub trainer: TrainerSettings,
    /// Control loop settings
    pub control: ControlSettings,
    /// Recording settings
    pub recording: RecordingSettings,
    /// Ride selection
    pub ride: RideSettings,
}

/// Rider-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiderSettings {
    /// Rider weight in kilograms
    pub weight_kg: f64,
    /// Bike weight in kilograms
    pub bike_weight_kg: f64,
}

impl Default for RiderSettings {
    fn default() -> Self {
        Self {
            weight_kg: 75.0,
            bike_weight_kg: 10.0,
        }
    }
}

impl RiderSettings {
    /// Total system mass (rider + bike)
    pub fn total_mass_kg(&self) -> f64 {
        self.weight_kg + self.bike_weight_kg
    }
}

/// Trainer link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSettings {
    /// BLE identifier of the paired trainer; none rides in Demo mode
    pub device_id: Option<String>,
    /// Auto-reconnect on disconnect
    pub auto_reconnect: bool,
    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,
    /// Delay before the first reconnection attempt, in milliseconds
    pub reconnect_initial_delay_ms: u64,
    /// Upper bound on the reconnection delay, in milliseconds
    pub reconnect_max_delay_ms: u64,
    /// Maximum reconnection attempts
    pub max_reconnect_attempts: u32,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            device_id: None,
            auto_reconnect: true,
            connection_timeout_secs: 10,
            reconnect_initial_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 6,
        }
    }
}

impl TrainerSettings {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }
}

/// Control loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Timer tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Minimum spacing of SIM commands in milliseconds
    pub sim_command_interval_ms: u64,
    /// Refresh interval of the ERG target in milliseconds
    pub erg_refresh_interval_ms: u64,
    /// ERG target used when none is given
    pub default_erg_watts: u16,
    /// Trailing grade window in meters
    pub smoothing_window_m: f64,
    /// Maximum change of the SIM grade in percent per second
    pub max_grade_rate_pct_per_s: f64,
    /// SIM difficulty multiplier (0.5 - 1.5)
    pub resistance_scale: f64,
    /// Rolling resistance coefficient
    pub rolling_resistance: f64,
    /// Wind resistance coefficient in kg/m
    pub wind_resistance: f64,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 250,
            sim_command_interval_ms: 2_000,
            erg_refresh_interval_ms: 5_000,
            default_erg_watts: 200,
            smoothing_window_m: 50.0,
            max_grade_rate_pct_per_s: 1.0,
            resistance_scale: 1.0,
            rolling_resistance: 0.004,
            wind_resistance: 0.51,
        }
    }
}

impl ControlSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sim_command_interval(&self) -> Duration {
        Duration::from_millis(self.sim_command_interval_ms)
    }

    pub fn erg_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.erg_refresh_interval_ms)
    }

    /// Physics model using the configured resistance coefficients.
    pub fn physics(&self) -> PhysicsModel {
        PhysicsModel::from_resistance(self.rolling_resistance, self.wind_resistance)
    }
}

/// Recording-related settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    /// Start recording as soon as the ride starts
    pub auto_record: bool,
    /// Interval between ride log rows in milliseconds
    pub log_interval_ms: u64,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            auto_record: true,
            log_interval_ms: 1_000,
        }
    }
}

impl RecordingSettings {
    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }
}

/// Ride selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RideSettings {
    /// Route to ride; the first available route when unset
    pub route_name: Option<String>,
    /// Enter SIM mode once the ride starts
    pub start_in_sim: bool,
}

impl AppConfig {
    /// Check the values a ride cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(30.0..=200.0).contains(&self.rider.weight_kg) {
            return invalid("rider.weight_kg must be between 30 and 200");
        }
        if !(0.0..=50.0).contains(&self.rider.bike_weight_kg) {
            return invalid("rider.bike_weight_kg must be between 0 and 50");
        }
        if self.control.tick_interval_ms == 0 {
            return invalid("control.tick_interval_ms must be positive");
        }
        if self.control.sim_command_interval_ms == 0 || self.control.erg_refresh_interval_ms == 0
        {
            return invalid("control command intervals must be positive");
        }
        if self.control.smoothing_window_m < 0.0 || self.control.max_grade_rate_pct_per_s <= 0.0 {
            return invalid("control smoothing parameters must be positive");
        }
        if !(0.5..=1.5).contains(&self.control.resistance_scale) {
            return invalid("control.resistance_scale must be between 0.5 and 1.5");
        }
        if self.control.rolling_resistance < 0.0 || self.control.wind_resistance < 0.0 {
            return invalid("resistance coefficients must not be negative");
        }
        if self.recording.log_interval_ms == 0 {
            return invalid("recording.log_interval_ms must be positive");
        }
        if self.trainer.reconnect_initial_delay_ms > self.trainer.reconnect_max_delay_ms {
            return invalid("trainer.reconnect_initial_delay_ms exceeds the maximum delay");
        }
        Ok(())
    }

    /// Directory holding route JSON files.
    pub fn routes_dir(&self) -> PathBuf {
        self.data_dir.join("routes")
    }

    /// Directory holding ride logs.
    pub fn rides_dir(&self) -> PathBuf {
        self.data_dir.join("rides")
    }
}

/// Get the application data directory.
pub fn get_data_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "crankride", "CrankRide")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.toml")
}

/// Load application configuration from the default location.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.data_dir = get_data_dir();
    Ok(config)
}

/// Load configuration from a file; a missing file yields the defaults.
///
/// The data directory is set to the file's parent.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let data_dir = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if !path.exists() {
        return Ok(AppConfig {
            data_dir,
            ..Default::default()
        });
    }

    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

    let mut config: AppConfig =
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.data_dir = data_dir;
    config.validate()?;

    Ok(config)
}

/// Save application configuration to the default location.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

/// Save application configuration to a file.
pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
    }

    let content =
        toml::to_string_pretty(config).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

    Ok(())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
