//! Trainer link types: connection status, transport errors and the
//! reconnection policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Connection status of the trainer link as seen by the ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ConnectionStatus {
    /// No trainer link (demo ride, or reconnection gave up)
    #[default]
    Disconnected,
    /// Active link
    Connected,
    /// Link lost; reconnection attempt `attempt` (1-based) is pending
    Reconnecting { attempt: u32 },
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Reconnecting { attempt } => {
                write!(f, "Reconnecting... (attempt {})", attempt)
            }
        }
    }
}

/// Errors raised by a trainer transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// BLE adapter not found or unavailable
    #[error("Bluetooth adapter not found")]
    AdapterNotFound,

    /// Trainer not found with given device ID
    #[error("Trainer not found: {0}")]
    TrainerNotFound(String),

    /// Connection to the trainer failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timed out
    #[error("Connection timed out")]
    ConnectionTimeout,

    /// The link is down
    #[error("Trainer disconnected")]
    Disconnected,

    /// Failed to subscribe to notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Failed to write to the control point
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The trainer lacks a required characteristic
    #[error("Trainer does not expose characteristic {0}")]
    MissingCharacteristic(uuid::Uuid),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}

/// Capped exponential backoff used when the trainer link drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before `attempt` (1-based): initial, 2x, 4x ... capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 6,
        }
    }
}
