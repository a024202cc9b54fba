//! Persistent settings.

pub mod config;

pub use config::{load_config, save_config, AppConfig, ConfigError};
