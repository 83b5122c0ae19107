//! Spectral analysis of acquired frames

pub mod fft;
pub mod windowing;
pub mod analysis;
pub mod power;

use thiserror::Error;

pub use fft::{FftEngine, frequency_axis};
pub use windowing::{SampleBuffer, apply_window, subtract_mean};
pub use analysis::{FrameFormat, Peak, SpectrumEngine, SpectrumState, SpectrumUnit, convert_unit, find_peak};
pub use power::{PowerBand, integrate};

#[derive(Error, Debug)]
pub enum SpectrumError {
    #[error("Window has {window} coefficients but the frame has {samples} samples")]
    WindowLength { window: usize, samples: usize },

    #[error("FFT failed: {0}")]
    Fft(String),
}
