//! FFT engine using realfft for real-valued frames
//!
//! A transform of size T evaluates 2T-point DFT bins 0..=T, so the frequency
//! resolution can be chosen independently of the frame length.

use num_complex::Complex64;
use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;

use super::SpectrumError;

/// Largest transform size accepted by the analysis
pub const MAX_TRANSFORM_SIZE: usize = 16384;

/// One-sided FFT of a windowed frame, zero-padded or truncated to 2T points
pub struct FftEngine {
    /// Number of bins above DC (T)
    transform_size: usize,

    /// Real FFT processor of length 2T
    r2c: Arc<dyn RealToComplex<f64>>,

    /// Reusable input buffer
    input_buffer: Vec<f64>,

    /// Reusable output buffer (T + 1 bins)
    output_buffer: Vec<Complex64>,

    scratch: Vec<Complex64>,
}

impl FftEngine {
    /// Create new FFT engine
    ///
    /// # Arguments
    /// * `transform_size` - Number of bins above DC; clamped to 1..=16384
    pub fn new(transform_size: usize) -> Self {
        let transform_size = transform_size.clamp(1, MAX_TRANSFORM_SIZE);
        let mut planner = RealFftPlanner::<f64>::new();
        let r2c = planner.plan_fft_forward(2 * transform_size);

        let input_buffer = r2c.make_input_vec();
        let output_buffer = r2c.make_output_vec();
        let scratch = r2c.make_scratch_vec();

        Self {
            transform_size,
            r2c,
            input_buffer,
            output_buffer,
            scratch,
        }
    }

    /// Transform a windowed frame
    ///
    /// # Arguments
    /// * `windowed` - Windowed samples; zero-padded or truncated to 2T points
    /// * `frame_length` - Number of samples in the original frame (N), used
    ///   for the 2/N amplitude scaling
    ///
    /// # Returns
    /// Bins 0..=T scaled by 2/N
    pub fn transform(&mut self, windowed: &[f64], frame_length: usize) -> Result<Vec<Complex64>, SpectrumError> {
        let n = self.input_buffer.len();
        let copy_len = windowed.len().min(n);
        self.input_buffer[..copy_len].copy_from_slice(&windowed[..copy_len]);
        self.input_buffer[copy_len..].fill(0.0);

        self.r2c
            .process_with_scratch(&mut self.input_buffer, &mut self.output_buffer, &mut self.scratch)
            .map_err(|e| SpectrumError::Fft(e.to_string()))?;

        let scale = if frame_length > 0 { 2.0 / frame_length as f64 } else { 0.0 };
        Ok(self.output_buffer.iter().map(|&c| c * scale).collect())
    }

    /// Get transform size (bins above DC)
    pub fn transform_size(&self) -> usize {
        self.transform_size
    }

    /// Number of output bins (T + 1)
    pub fn num_bins(&self) -> usize {
        self.transform_size + 1
    }
}

/// Evenly spaced axis from 0 to the Nyquist frequency of the effective rate
///
/// # Arguments
/// * `transform_size` - Number of bins above DC (T)
/// * `sample_rate` - Board sample rate (Hz)
/// * `oversamples` - Oversampling factor; the effective rate is `sample_rate / oversamples`
///
/// # Returns
/// T + 1 frequencies in Hz
pub fn frequency_axis(transform_size: usize, sample_rate: f64, oversamples: u32) -> Vec<f64> {
    let nyquist = sample_rate / (2.0 * oversamples.max(1) as f64);
    let t = transform_size.max(1);
    (0..=t).map(|k| nyquist * k as f64 / t as f64).collect()
}
