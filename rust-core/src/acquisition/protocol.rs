//! Line protocol spoken with the acquisition board
//!
//! One command per line, no acknowledgement. Frames come back as packed
//! little-endian `f32` samples after each `send data` request.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::filters::config::format_value;
use crate::filters::{FilterConfig, FilterKind};

/// Signal sources the board can route to the converter
pub const SOURCES: [&str; 3] = ["AD4020", "LTC2500", "Internal ADC"];

/// Input bounds the board accepts
pub const SAMPLE_RATE_RANGE: (f64, f64) = (1.0, 80000.0);
pub const DATA_SIZE_RANGE: (usize, usize) = (1, 32768);
pub const OVERSAMPLES_RANGE: (u32, u32) = (1, 65536);
pub const PROCESSING_RATE_RANGE: (f64, f64) = (1.0, 80000.0);
pub const MAX_CHANNELS: usize = 3;

/// Board operation modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OperationMode {
    #[default]
    #[serde(rename = "AD4020 spectral analysis")]
    Ad4020Spectral,
    #[serde(rename = "LTC2500 spectral analysis")]
    Ltc2500Spectral,
    #[serde(rename = "Internal ADC spectral analysis")]
    InternalAdcSpectral,
    #[serde(rename = "Pulse response & signal processing")]
    PulseResponse,
    #[serde(rename = "Step up response & signal processing")]
    StepUpResponse,
    #[serde(rename = "Step down response & signal processing")]
    StepDownResponse,
}

impl OperationMode {
    pub const ALL: [OperationMode; 6] = [
        OperationMode::Ad4020Spectral,
        OperationMode::Ltc2500Spectral,
        OperationMode::InternalAdcSpectral,
        OperationMode::PulseResponse,
        OperationMode::StepUpResponse,
        OperationMode::StepDownResponse,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OperationMode::Ad4020Spectral => "AD4020 spectral analysis",
            OperationMode::Ltc2500Spectral => "LTC2500 spectral analysis",
            OperationMode::InternalAdcSpectral => "Internal ADC spectral analysis",
            OperationMode::PulseResponse => "Pulse response & signal processing",
            OperationMode::StepUpResponse => "Step up response & signal processing",
            OperationMode::StepDownResponse => "Step down response & signal processing",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Spectral modes analyse an external signal; the others measure the
    /// response of the board filter to a generated pulse or step
    pub fn is_spectral(&self) -> bool {
        matches!(
            self,
            OperationMode::Ad4020Spectral | OperationMode::Ltc2500Spectral | OperationMode::InternalAdcSpectral
        )
    }

    /// Converter feeding the analysed channel
    pub fn source(&self) -> &'static str {
        match self {
            OperationMode::Ltc2500Spectral => "LTC2500",
            OperationMode::InternalAdcSpectral => "Internal ADC",
            _ => "AD4020",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One line sent to the board
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetSampleRate(f64),
    SetDataSize(usize),
    SetOversamples(u32),
    SetMode(OperationMode),
    SetProcessingRate(f64),
    SetFilter(FilterKind),
    SetFilterProperty { index: u8, value: String },
    Activate(String),
    Deactivate(String),
    SendData,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetSampleRate(rate) => write!(f, "set samplerate {}", format_value(*rate)),
            Command::SetDataSize(size) => write!(f, "set dataSize {}", size),
            Command::SetOversamples(n) => write!(f, "set oversamples {}", n),
            Command::SetMode(mode) => write!(f, "set mode {}", mode),
            Command::SetProcessingRate(rate) => write!(f, "set processing rate {}", format_value(*rate)),
            Command::SetFilter(kind) => write!(f, "set filter {}", kind.board_name()),
            Command::SetFilterProperty { index, value } => write!(f, "set filterProperty{} {}", index, value),
            Command::Activate(source) => write!(f, "activate {}", source),
            Command::Deactivate(source) => write!(f, "deactivate {}", source),
            Command::SendData => f.write_str("send data"),
        }
    }
}

/// Board-side configuration, everything that has to be restored after a reconnect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub sample_rate: f64,
    pub data_size: usize,
    pub oversamples: u32,
    pub processing_rate: f64,
    pub mode: OperationMode,
    /// Channels per frame, channel-major
    pub channels: usize,
    pub filter: FilterConfig,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            sample_rate: 1000.0,
            data_size: 100,
            oversamples: 1,
            processing_rate: 20000.0,
            mode: OperationMode::default(),
            channels: 1,
            filter: FilterConfig::default(),
        }
    }
}

impl BoardSettings {
    /// Clamp every value into the range the board accepts
    pub fn clamped(&self) -> Self {
        let rate = |value: f64, (lo, hi): (f64, f64)| if value.is_nan() { lo } else { value.clamp(lo, hi) };
        let mut board = Self {
            sample_rate: rate(self.sample_rate, SAMPLE_RATE_RANGE),
            data_size: self.data_size.clamp(DATA_SIZE_RANGE.0, DATA_SIZE_RANGE.1),
            oversamples: self.oversamples.clamp(OVERSAMPLES_RANGE.0, OVERSAMPLES_RANGE.1),
            processing_rate: rate(self.processing_rate, PROCESSING_RATE_RANGE),
            mode: self.mode,
            channels: self.channels.clamp(1, MAX_CHANNELS),
            filter: self.filter.clamped(),
        };
        // Response measurements sample at the filter rate
        if !board.mode.is_spectral() {
            board.sample_rate = board.processing_rate;
        }
        board
    }

    /// Bytes in one frame
    pub fn frame_bytes(&self) -> usize {
        self.data_size * self.channels * 4
    }

    /// Full configuration in restore order: rate, size, oversampling, mode,
    /// processing rate, filter and its properties
    pub fn restore_commands(&self) -> Vec<Command> {
        let mut commands = vec![
            Command::SetSampleRate(self.sample_rate),
            Command::SetDataSize(self.data_size),
            Command::SetOversamples(self.oversamples),
        ];
        commands.extend(mode_commands(self.mode));
        commands.push(Command::SetProcessingRate(self.processing_rate));
        commands.extend(filter_commands(&self.filter));
        commands
    }
}

/// Switch the board to `mode`: every source is deactivated first
pub fn mode_commands(mode: OperationMode) -> Vec<Command> {
    let mut commands: Vec<Command> = SOURCES.iter().map(|s| Command::Deactivate(s.to_string())).collect();
    commands.push(Command::SetMode(mode));
    commands
}

/// Select `filter` and send each of its properties
pub fn filter_commands(filter: &FilterConfig) -> Vec<Command> {
    let mut commands = vec![Command::SetFilter(filter.kind())];
    commands.extend(
        filter
            .properties()
            .into_iter()
            .map(|(index, value)| Command::SetFilterProperty { index, value }),
    );
    commands
}

/// Split a raw frame into channels of `data_size` samples
///
/// # Returns
/// `None` unless `bytes` holds exactly `data_size * channels` samples
pub fn decode_frame(bytes: &[u8], data_size: usize, channels: usize) -> Option<Vec<Vec<f64>>> {
    if channels == 0 || bytes.len() != data_size * channels * 4 {
        return None;
    }

    let samples: Vec<f64> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
        .collect();

    if data_size == 0 {
        return Some(vec![Vec::new(); channels]);
    }
    Some(samples.chunks(data_size).map(|c| c.to_vec()).collect())
}

/// Encode samples the way the board sends them
pub fn encode_frame(samples: &[f64]) -> Vec<u8> {
    samples.iter().flat_map(|&s| (s as f32).to_le_bytes()).collect()
}
