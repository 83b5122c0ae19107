//! Acquisition configuration
//!
//! Every section has defaults, so an empty file (or no file at all) gives a
//! working setup: 1 kHz sampling, 100-sample frames, Rectangle window and a
//! unity scaling filter. Out-of-range values are clamped, never rejected.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::acquisition::protocol::BoardSettings;
use crate::filters::{ModelMode, WindowRegistry};
use crate::port::{PortSelector, DEFAULT_MAX_BUFFER_BYTES};
use crate::spectrum::fft::MAX_TRANSFORM_SIZE;
use crate::spectrum::{PowerBand, SpectrumUnit};

/// Window name that switches a comparison slot off
pub const DISABLED_WINDOW: &str = "Disabled";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error ({path}): {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    #[serde(default)]
    pub port: PortSettings,

    #[serde(default)]
    pub board: BoardSettings,

    #[serde(default)]
    pub analysis: AnalysisSettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// Serial link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Port name, or "Auto"
    pub name: String,
    /// Enumerated port opened by "Auto"
    pub auto_index: usize,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub max_buffer_bytes: usize,
    pub reconnect_interval_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            name: "Auto".to_string(),
            auto_index: 1,
            baud_rate: 9600,
            read_timeout_ms: 10,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            reconnect_interval_ms: 1,
        }
    }
}

impl PortSettings {
    pub fn selector(&self) -> PortSelector {
        PortSelector::parse(&self.name, self.auto_index)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// One spectrum comparison slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotSettings {
    /// Window name, or "Disabled"
    pub window: String,
    /// Bins above DC; `None` locks it to half the frame length
    pub transform_size: Option<usize>,
}

impl Default for SlotSettings {
    fn default() -> Self {
        Self {
            window: "Rectangle".to_string(),
            transform_size: None,
        }
    }
}

impl SlotSettings {
    pub fn disabled() -> Self {
        Self {
            window: DISABLED_WINDOW.to_string(),
            transform_size: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window != DISABLED_WINDOW
    }

    /// Transform size used for frames of `data_size` samples
    pub fn effective_transform_size(&self, data_size: usize) -> usize {
        self.transform_size
            .unwrap_or(data_size / 2)
            .clamp(1, MAX_TRANSFORM_SIZE)
    }
}

/// Spectrum processing and display options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub slot1: SlotSettings,
    pub slot2: SlotSettings,
    pub unit: SpectrumUnit,
    pub averaging: bool,
    pub subtract_mean: bool,
    pub phase: bool,
    /// Band to integrate; omitted disables the power readout
    pub power_band: Option<PowerBand>,
    pub model: ModelMode,
    /// Frames with a larger sample magnitude are treated as misreads
    pub sanity_limit: f64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            slot1: SlotSettings::default(),
            slot2: SlotSettings::disabled(),
            unit: SpectrumUnit::default(),
            averaging: false,
            subtract_mean: false,
            phase: false,
            power_band: None,
            model: ModelMode::Disabled,
            sanity_limit: 100.0,
        }
    }
}

/// Loop scheduling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub tick_interval_ms: u64,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self { tick_interval_ms: 1 }
    }
}

impl RuntimeSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl AcquisitionConfig {
    /// Load `path`, or fall back to the built-in defaults when there is none
    ///
    /// The binary resolves `path` from its command line or `$DSMV_CONFIG`.
    /// A named file that fails to load is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let config = Self::load_from_file(path)?;
                log::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            None => {
                log::info!("Using built-in default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Read, parse, clamp and validate a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let config = config.clamped();
        config.validate(&WindowRegistry::default())?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Clamp every numeric setting into its supported range
    pub fn clamped(&self) -> Self {
        let mut config = self.clone();
        config.board = self.board.clamped();
        config.port.max_buffer_bytes = self.port.max_buffer_bytes.max(config.board.frame_bytes());
        for slot in [&mut config.analysis.slot1, &mut config.analysis.slot2] {
            slot.transform_size = slot.transform_size.map(|t| t.clamp(1, MAX_TRANSFORM_SIZE));
        }
        if !(config.analysis.sanity_limit > 0.0) {
            config.analysis.sanity_limit = AnalysisSettings::default().sanity_limit;
        }
        config
    }

    /// Reject settings that cannot be clamped: unknown window names
    pub fn validate(&self, registry: &WindowRegistry) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        for (label, slot) in [("slot1", &self.analysis.slot1), ("slot2", &self.analysis.slot2)] {
            if slot.is_enabled() && !registry.contains(&slot.window) {
                errors.push(format!("analysis.{}.window: unknown window '{}'", label, slot.window));
            }
        }
        if let Some(fir) = self.board.filter.fir_params() {
            if !registry.contains(&fir.window) {
                errors.push(format!("board.filter.fir.window: unknown window '{}'", fir.window));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
