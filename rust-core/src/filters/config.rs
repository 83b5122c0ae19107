//! Board-side signal filter configuration
//!
//! One variant per filter kind the board implements. Each variant carries its
//! own typed parameters; the board only ever sees them as numbered properties.

use serde::{Deserialize, Serialize};

use super::design::FirResponse;

/// Maximum number of moving-average taps
pub const MAX_MOVING_AVERAGE_TAPS: usize = 256;

/// Inclusive FIR order bounds (order must be even)
pub const MIN_FIR_ORDER: usize = 2;
pub const MAX_FIR_ORDER: usize = 140;

/// Fixed-point or floating-point implementation used by the board's FIR filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Arithmetic {
    #[default]
    #[serde(rename = "Integer double buffer")]
    IntegerDoubleBuffer,
    #[serde(rename = "Integer if modulo")]
    IntegerIfModulo,
    #[serde(rename = "Integer modulo")]
    IntegerModulo,
    #[serde(rename = "Float double buffer")]
    FloatDoubleBuffer,
    #[serde(rename = "Float if modulo")]
    FloatIfModulo,
    #[serde(rename = "Float modulo")]
    FloatModulo,
}

impl Arithmetic {
    pub const ALL: [Arithmetic; 6] = [
        Arithmetic::IntegerDoubleBuffer,
        Arithmetic::IntegerIfModulo,
        Arithmetic::IntegerModulo,
        Arithmetic::FloatDoubleBuffer,
        Arithmetic::FloatIfModulo,
        Arithmetic::FloatModulo,
    ];

    /// Name understood by `set filterProperty5`
    pub fn name(&self) -> &'static str {
        match self {
            Arithmetic::IntegerDoubleBuffer => "Integer double buffer",
            Arithmetic::IntegerIfModulo => "Integer if modulo",
            Arithmetic::IntegerModulo => "Integer modulo",
            Arithmetic::FloatDoubleBuffer => "Float double buffer",
            Arithmetic::FloatIfModulo => "Float if modulo",
            Arithmetic::FloatModulo => "Float modulo",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.name() == name)
    }
}

/// Parameters shared by all FIR filter kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirParams {
    /// Filter order; `order + 1` taps
    pub order: usize,
    /// Window name ("Rectangle" or "Hamming" on the board)
    pub window: String,
    pub arithmetic: Arithmetic,
}

impl Default for FirParams {
    fn default() -> Self {
        Self {
            order: MIN_FIR_ORDER,
            window: "Rectangle".to_string(),
            arithmetic: Arithmetic::default(),
        }
    }
}

/// Filter kinds, in the order the board lists them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Scaling,
    MovingAverage,
    LowPass1,
    HighPass1,
    FirBandpass,
    FirBandstop,
    FirLowpass,
    FirHighpass,
    LowPass2,
    LowPass3,
    ProgrammableIir,
}

impl FilterKind {
    pub const ALL: [FilterKind; 11] = [
        FilterKind::Scaling,
        FilterKind::MovingAverage,
        FilterKind::LowPass1,
        FilterKind::HighPass1,
        FilterKind::FirBandpass,
        FilterKind::FirBandstop,
        FilterKind::FirLowpass,
        FilterKind::FirHighpass,
        FilterKind::LowPass2,
        FilterKind::LowPass3,
        FilterKind::ProgrammableIir,
    ];

    /// Name understood by `set filter`
    pub fn board_name(&self) -> &'static str {
        match self {
            FilterKind::Scaling => "Scaling",
            FilterKind::MovingAverage => "Moving average",
            FilterKind::LowPass1 => "Low pass filter 1st order",
            FilterKind::HighPass1 => "High pass filter 1st order",
            FilterKind::FirBandpass => "FIR bandpass filter",
            FilterKind::FirBandstop => "FIR bandstop filter",
            FilterKind::FirLowpass => "FIR low pass filter",
            FilterKind::FirHighpass => "FIR high pass filter",
            FilterKind::LowPass2 => "Low pass filter 2nd order",
            FilterKind::LowPass3 => "Low pass filter 3rd order",
            FilterKind::ProgrammableIir => "Programmable IIR filter",
        }
    }

    pub fn from_board_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.board_name() == name)
    }

    pub fn is_fir(&self) -> bool {
        matches!(
            self,
            FilterKind::FirBandpass | FilterKind::FirBandstop | FilterKind::FirLowpass | FilterKind::FirHighpass
        )
    }

    /// Whether a discrete-time model exists for this kind
    pub fn supports_hz(&self) -> bool {
        !matches!(self, FilterKind::ProgrammableIir)
    }

    /// Whether a continuous-time model exists for this kind
    pub fn supports_hs(&self) -> bool {
        !self.is_fir() && !matches!(self, FilterKind::ProgrammableIir)
    }
}

/// The filter currently running on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FilterConfig {
    #[serde(rename = "Scaling")]
    Scaling { gain: f64 },
    #[serde(rename = "Moving average")]
    MovingAverage { taps: usize },
    #[serde(rename = "Low pass filter 1st order")]
    LowPass1 { cutoff: f64 },
    #[serde(rename = "High pass filter 1st order")]
    HighPass1 { cutoff: f64 },
    #[serde(rename = "FIR bandpass filter")]
    FirBandpass {
        lower: f64,
        upper: f64,
        #[serde(default)]
        fir: FirParams,
    },
    #[serde(rename = "FIR bandstop filter")]
    FirBandstop {
        lower: f64,
        upper: f64,
        #[serde(default)]
        fir: FirParams,
    },
    #[serde(rename = "FIR low pass filter")]
    FirLowpass {
        cutoff: f64,
        #[serde(default)]
        fir: FirParams,
    },
    #[serde(rename = "FIR high pass filter")]
    FirHighpass {
        cutoff: f64,
        #[serde(default)]
        fir: FirParams,
    },
    #[serde(rename = "Low pass filter 2nd order")]
    LowPass2 { cutoff: f64 },
    #[serde(rename = "Low pass filter 3rd order")]
    LowPass3 { cutoff: f64 },
    #[serde(rename = "Programmable IIR filter")]
    ProgrammableIir,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::Scaling { gain: 1.0 }
    }
}

impl FilterConfig {
    /// Default parameters the board starts a filter kind with
    pub fn default_for(kind: FilterKind) -> Self {
        match kind {
            FilterKind::Scaling => FilterConfig::Scaling { gain: 1.0 },
            FilterKind::MovingAverage => FilterConfig::MovingAverage { taps: 1 },
            FilterKind::LowPass1 => FilterConfig::LowPass1 { cutoff: 0.0 },
            FilterKind::HighPass1 => FilterConfig::HighPass1 { cutoff: 0.0 },
            FilterKind::FirBandpass => FilterConfig::FirBandpass { lower: 0.0, upper: 0.0, fir: FirParams::default() },
            FilterKind::FirBandstop => FilterConfig::FirBandstop { lower: 0.0, upper: 0.0, fir: FirParams::default() },
            FilterKind::FirLowpass => FilterConfig::FirLowpass { cutoff: 0.0, fir: FirParams::default() },
            FilterKind::FirHighpass => FilterConfig::FirHighpass { cutoff: 0.0, fir: FirParams::default() },
            FilterKind::LowPass2 => FilterConfig::LowPass2 { cutoff: 0.0 },
            FilterKind::LowPass3 => FilterConfig::LowPass3 { cutoff: 0.0 },
            FilterKind::ProgrammableIir => FilterConfig::ProgrammableIir,
        }
    }

    pub fn kind(&self) -> FilterKind {
        match self {
            FilterConfig::Scaling { .. } => FilterKind::Scaling,
            FilterConfig::MovingAverage { .. } => FilterKind::MovingAverage,
            FilterConfig::LowPass1 { .. } => FilterKind::LowPass1,
            FilterConfig::HighPass1 { .. } => FilterKind::HighPass1,
            FilterConfig::FirBandpass { .. } => FilterKind::FirBandpass,
            FilterConfig::FirBandstop { .. } => FilterKind::FirBandstop,
            FilterConfig::FirLowpass { .. } => FilterKind::FirLowpass,
            FilterConfig::FirHighpass { .. } => FilterKind::FirHighpass,
            FilterConfig::LowPass2 { .. } => FilterKind::LowPass2,
            FilterConfig::LowPass3 { .. } => FilterKind::LowPass3,
            FilterConfig::ProgrammableIir => FilterKind::ProgrammableIir,
        }
    }

    pub fn board_name(&self) -> &'static str {
        self.kind().board_name()
    }

    /// FIR parameters, if this is a FIR kind
    pub fn fir_params(&self) -> Option<&FirParams> {
        match self {
            FilterConfig::FirBandpass { fir, .. }
            | FilterConfig::FirBandstop { fir, .. }
            | FilterConfig::FirLowpass { fir, .. }
            | FilterConfig::FirHighpass { fir, .. } => Some(fir),
            _ => None,
        }
    }

    /// Ideal response of a FIR kind
    pub fn fir_response(&self) -> Option<FirResponse> {
        match *self {
            FilterConfig::FirBandpass { lower, upper, .. } => Some(FirResponse::Bandpass { lower, upper }),
            FilterConfig::FirBandstop { lower, upper, .. } => Some(FirResponse::Bandstop { lower, upper }),
            FilterConfig::FirLowpass { cutoff, .. } => Some(FirResponse::Lowpass { cutoff }),
            FilterConfig::FirHighpass { cutoff, .. } => Some(FirResponse::Highpass { cutoff }),
            _ => None,
        }
    }

    /// Clamp every parameter into the range the board accepts
    ///
    /// Frequencies below zero (or NaN) become 0, taps are limited to
    /// 1..=256 and FIR orders are rounded down to an even value in 2..=140.
    pub fn clamped(&self) -> Self {
        let freq = |f: f64| if f.is_nan() { 0.0 } else { f.max(0.0) };
        let fir = |p: &FirParams| FirParams {
            order: clamp_fir_order(p.order),
            window: p.window.clone(),
            arithmetic: p.arithmetic,
        };

        match self {
            FilterConfig::Scaling { gain } => FilterConfig::Scaling {
                gain: if gain.is_nan() { 1.0 } else { *gain },
            },
            FilterConfig::MovingAverage { taps } => FilterConfig::MovingAverage {
                taps: (*taps).clamp(1, MAX_MOVING_AVERAGE_TAPS),
            },
            FilterConfig::LowPass1 { cutoff } => FilterConfig::LowPass1 { cutoff: freq(*cutoff) },
            FilterConfig::HighPass1 { cutoff } => FilterConfig::HighPass1 { cutoff: freq(*cutoff) },
            FilterConfig::FirBandpass { lower, upper, fir: p } => FilterConfig::FirBandpass {
                lower: freq(*lower),
                upper: freq(*upper),
                fir: fir(p),
            },
            FilterConfig::FirBandstop { lower, upper, fir: p } => FilterConfig::FirBandstop {
                lower: freq(*lower),
                upper: freq(*upper),
                fir: fir(p),
            },
            FilterConfig::FirLowpass { cutoff, fir: p } => FilterConfig::FirLowpass {
                cutoff: freq(*cutoff),
                fir: fir(p),
            },
            FilterConfig::FirHighpass { cutoff, fir: p } => FilterConfig::FirHighpass {
                cutoff: freq(*cutoff),
                fir: fir(p),
            },
            FilterConfig::LowPass2 { cutoff } => FilterConfig::LowPass2 { cutoff: freq(*cutoff) },
            FilterConfig::LowPass3 { cutoff } => FilterConfig::LowPass3 { cutoff: freq(*cutoff) },
            FilterConfig::ProgrammableIir => FilterConfig::ProgrammableIir,
        }
    }

    /// Numbered board properties (`set filterProperty<n> <value>`) in send order
    ///
    /// Only the properties the kind actually has are listed.
    pub fn properties(&self) -> Vec<(u8, String)> {
        let fir_props = |fir: &FirParams| {
            vec![
                (3, fir.order.to_string()),
                (4, fir.window.clone()),
                (5, fir.arithmetic.name().to_string()),
            ]
        };

        match self {
            FilterConfig::Scaling { gain } => vec![(1, format_value(*gain))],
            FilterConfig::MovingAverage { taps } => vec![(1, taps.to_string())],
            FilterConfig::LowPass1 { cutoff }
            | FilterConfig::HighPass1 { cutoff }
            | FilterConfig::LowPass2 { cutoff }
            | FilterConfig::LowPass3 { cutoff } => vec![(1, format_value(*cutoff))],
            FilterConfig::FirBandpass { lower, upper, fir } | FilterConfig::FirBandstop { lower, upper, fir } => {
                let mut props = vec![(1, format_value(*lower)), (2, format_value(*upper))];
                props.extend(fir_props(fir));
                props
            }
            FilterConfig::FirLowpass { cutoff, fir } | FilterConfig::FirHighpass { cutoff, fir } => {
                let mut props = vec![(1, format_value(*cutoff))];
                props.extend(fir_props(fir));
                props
            }
            FilterConfig::ProgrammableIir => Vec::new(),
        }
    }

    /// Reference bin (on the full 0..=T frequency axis) used to normalize
    /// both the measured and the modelled response; `None` means "use the maximum"
    ///
    /// # Arguments
    /// * `transform_size` - Number of bins T above DC
    /// * `processing_rate` - Rate the filter runs at (Hz)
    pub fn norm_bin(&self, transform_size: usize, processing_rate: f64) -> Option<usize> {
        let last = transform_size.max(1);
        match self {
            FilterConfig::HighPass1 { .. } | FilterConfig::FirHighpass { .. } => Some(last),
            FilterConfig::FirBandpass { lower, upper, .. } => {
                let bin = if processing_rate > 0.0 {
                    ((lower + upper) / processing_rate * transform_size as f64).round()
                } else {
                    1.0
                };
                Some((bin.max(1.0) as usize).min(last))
            }
            FilterConfig::ProgrammableIir => None,
            _ => Some(1),
        }
    }
}

/// Round a requested FIR order down to an even value within bounds
pub fn clamp_fir_order(order: usize) -> usize {
    (2 * (order / 2)).clamp(MIN_FIR_ORDER, MAX_FIR_ORDER)
}

/// Board representation of a float; whole numbers keep a trailing ".0"
pub fn format_value(value: f64) -> String {
    format!("{:?}", value)
}
