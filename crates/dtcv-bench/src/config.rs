//! Bench configuration
//!
//! Loaded from a TOML file; every section and field has a default so an
//! empty file yields a working mock-transport setup.

use std::path::Path;
use std::time::Duration;

use dtcv_core::candidates::DEFAULT_MIN_CONFIDENCE;
use dtcv_core::image::DEFAULT_LAMP_THRESHOLD;
use dtcv_core::validate::DEFAULT_CORRECTION_PENALTY;
use dtcv_core::Region;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete bench configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub manual: ManualConfig,
}

impl BenchConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        if t.time_unit_ms == 0 {
            return Err(ConfigError::Invalid("timing.time_unit_ms must be > 0".into()));
        }
        if t.transmit_interval_units == 0 {
            return Err(ConfigError::Invalid(
                "timing.transmit_interval_units must be > 0".into(),
            ));
        }
        if t.max_window_units < t.settle_units {
            return Err(ConfigError::Invalid(format!(
                "timing.max_window_units ({}) must not be shorter than settle_units ({})",
                t.max_window_units, t.settle_units
            )));
        }
        if !(0.0..=1.0).contains(&self.recognition.correction_penalty) {
            return Err(ConfigError::Invalid(
                "recognition.correction_penalty must be within 0..=1".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// CAN transport selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Raw SocketCAN (Linux only)
    SocketCan(SocketCanConfig),
    /// In-process mock bus
    Mock,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock
    }
}

/// SocketCAN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketCanConfig {
    /// CAN interface name (e.g., "can0")
    #[serde(default = "default_interface")]
    pub interface: String,
}

impl Default for SocketCanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
        }
    }
}

fn default_interface() -> String {
    "can0".to_string()
}

// =============================================================================
// Timing
// =============================================================================

/// Timer settings, expressed in abstract time units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Length of one time unit in milliseconds
    #[serde(default = "default_time_unit_ms")]
    pub time_unit_ms: u64,
    /// Wait after a trigger before capturing the display
    #[serde(default = "default_settle_units")]
    pub settle_units: u32,
    /// Spacing of repeated DM1 transmissions
    #[serde(default = "default_one")]
    pub transmit_interval_units: u32,
    /// Give up on an entry after this long
    #[serde(default = "default_max_window_units")]
    pub max_window_units: u32,
    /// Pause between entries
    #[serde(default = "default_one")]
    pub inter_entry_pause_units: u32,
    /// Bus worker receive timeout in milliseconds
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            time_unit_ms: default_time_unit_ms(),
            settle_units: default_settle_units(),
            transmit_interval_units: default_one(),
            max_window_units: default_max_window_units(),
            inter_entry_pause_units: default_one(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn units(&self, n: u32) -> Duration {
        Duration::from_millis(self.time_unit_ms * n as u64)
    }

    pub fn settle(&self) -> Duration {
        self.units(self.settle_units)
    }

    pub fn transmit_interval(&self) -> Duration {
        self.units(self.transmit_interval_units)
    }

    pub fn max_window(&self) -> Duration {
        self.units(self.max_window_units)
    }

    pub fn inter_entry_pause(&self) -> Duration {
        self.units(self.inter_entry_pause_units)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn default_time_unit_ms() -> u64 {
    1000
}

fn default_settle_units() -> u32 {
    35
}

fn default_max_window_units() -> u32 {
    36
}

fn default_one() -> u32 {
    1
}

fn default_poll_timeout_ms() -> u64 {
    1000
}

// =============================================================================
// Listen mode
// =============================================================================

/// Listen-mode addressing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// DM1 frames from this source address are ignored (the bench's own)
    #[serde(default = "default_ignore_source_address")]
    pub ignore_source_address: u8,
    /// Source address of FF99 responses
    #[serde(default)]
    pub response_source_address: u8,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            ignore_source_address: default_ignore_source_address(),
            response_source_address: 0,
        }
    }
}

fn default_ignore_source_address() -> u8 {
    0x27
}

// =============================================================================
// Recognition
// =============================================================================

/// Display regions and recognition thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default)]
    pub spn_region: Region,
    #[serde(default)]
    pub fmi_region: Region,
    #[serde(default)]
    pub amber_region: Region,
    #[serde(default)]
    pub red_region: Region,
    /// Mean luminance above which a lamp counts as lit
    #[serde(default = "default_lamp_threshold")]
    pub lamp_threshold: f32,
    /// Recognizer candidates at or below this confidence are dropped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    /// Confidence multiplier for corrected readings
    #[serde(default = "default_correction_penalty")]
    pub correction_penalty: f32,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            spn_region: Region::default(),
            fmi_region: Region::default(),
            amber_region: Region::default(),
            red_region: Region::default(),
            lamp_threshold: default_lamp_threshold(),
            min_confidence: default_min_confidence(),
            correction_penalty: default_correction_penalty(),
        }
    }
}

fn default_lamp_threshold() -> f32 {
    DEFAULT_LAMP_THRESHOLD
}

fn default_min_confidence() -> f32 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_correction_penalty() -> f32 {
    DEFAULT_CORRECTION_PENALTY
}

// =============================================================================
// Manual send
// =============================================================================

/// Manual DTC transmission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualConfig {
    /// Transmissions per manual send in repeat mode
    #[serde(default = "default_repeat_count")]
    pub repeat_count: u32,
    #[serde(default = "default_one")]
    pub repeat_interval_units: u32,
}

impl Default for ManualConfig {
    fn default() -> Self {
        Self {
            repeat_count: default_repeat_count(),
            repeat_interval_units: default_one(),
        }
    }
}

fn default_repeat_count() -> u32 {
    3
}
