//! Peripheral configuration parameters
//!
//! All tunable parameters for the scriptable peripheral.
//! Loaded from JSON at startup or left at their defaults.

use core::fmt;
use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Core peripheral configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeripheralConfig {
    // --- Callback bridge ---
    /// How long the stack context waits for a script handler (milliseconds)
    pub callback_timeout_ms: u32,

    // --- Notifications ---
    /// Maximum value size offered to `onSubscribe`
    pub subscribe_max_value_size: u16,
    /// Invoke `onSubscribe` as soon as services are parsed instead of on
    /// the first CCC write that enables notifications
    pub subscribe_at_parse: bool,

    // --- Advertising ---
    /// Calibrated TX power at 0 m carried in the URL frame
    pub tx_power: u8,
    /// Minimum advertising interval (units of 0.625 ms)
    pub adv_interval_min: u16,
    /// Maximum advertising interval (units of 0.625 ms)
    pub adv_interval_max: u16,
}

impl Default for PeripheralConfig {
    fn default() -> Self {
        Self {
            // Bridge
            callback_timeout_ms: 5000,

            // Notifications
            subscribe_max_value_size: 20, // default ATT MTU - 3
            subscribe_at_parse: false,

            // Advertising
            tx_power: 0x00,
            adv_interval_min: 0x20, // 20 ms
            adv_interval_max: 0x40, // 40 ms
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroTimeout,
    ZeroValueSize,
    IntervalOrder,
    Parse,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroTimeout => write!(f, "callback_timeout_ms must be non-zero"),
            Self::ZeroValueSize => write!(f, "subscribe_max_value_size must be non-zero"),
            Self::IntervalOrder => write!(f, "adv_interval_min exceeds adv_interval_max"),
            Self::Parse => write!(f, "malformed configuration JSON"),
        }
    }
}

impl PeripheralConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.callback_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.subscribe_max_value_size == 0 {
            return Err(ConfigError::ZeroValueSize);
        }
        if self.adv_interval_min > self.adv_interval_max {
            return Err(ConfigError::IntervalOrder);
        }
        Ok(())
    }

    /// Parse and validate a JSON document; missing keys keep defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|_| ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.callback_timeout_ms))
    }
}
