//! Time-domain frame handling before the FFT
//!
//! DC subtraction, window application and the fixed-size sample buffer the
//! acquisition loop keeps between frames.

use crate::filters::windows::WindowSpec;

use super::SpectrumError;

/// Apply window to a frame
///
/// # Arguments
/// * `samples` - Input frame
/// * `window` - Window coefficients computed for `samples.len()`
///
/// # Returns
/// Windowed frame, or an error if the window was computed for another length
pub fn apply_window(samples: &[f64], window: &WindowSpec) -> Result<Vec<f64>, SpectrumError> {
    if window.len() != samples.len() {
        return Err(SpectrumError::WindowLength {
            window: window.len(),
            samples: samples.len(),
        });
    }

    Ok(samples
        .iter()
        .zip(window.coefficients.iter())
        .map(|(&s, &w)| s * w)
        .collect())
}

/// Subtract the arithmetic mean from every sample
pub fn subtract_mean(samples: &mut [f64]) {
    if samples.is_empty() {
        return;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    for s in samples.iter_mut() {
        *s -= mean;
    }
}

/// The most recent N samples of one channel
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBuffer {
    samples: Vec<f64>,
}

impl SampleBuffer {
    /// Zero-filled buffer of `size` samples
    pub fn new(size: usize) -> Self {
        Self { samples: vec![0.0; size] }
    }

    /// Replace the contents with a freshly read frame; the length follows the frame
    pub fn replace(&mut self, frame: &[f64]) {
        self.samples.clear();
        self.samples.extend_from_slice(frame);
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
