//! Power-in-band integration over the averaged spectrum

use serde::{Deserialize, Serialize};

/// Operator-selected frequency band, in Hz
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerBand {
    pub start: f64,
    pub end: f64,
}

impl PowerBand {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Band covering the whole axis
    pub fn full(nyquist: f64) -> Self {
        Self { start: 0.0, end: nyquist }
    }

    /// Clamp into `0 <= start <= end <= nyquist`
    pub fn clamped(&self, nyquist: f64) -> Self {
        let nyquist = nyquist.max(0.0);
        let end = if self.end.is_nan() { nyquist } else { self.end.clamp(0.0, nyquist) };
        let start = if self.start.is_nan() { 0.0 } else { self.start.clamp(0.0, end) };
        Self { start, end }
    }

    /// Inclusive bin range of the band on `axis` (0 to Nyquist)
    ///
    /// Returns `None` for an empty axis.
    pub fn bin_range(&self, axis: &[f64]) -> Option<(usize, usize)> {
        let last = *axis.last()?;
        let band = self.clamped(last);
        let start = frequency_to_bin(band.start, axis)?;
        let end = frequency_to_bin(band.end, axis)?;
        Some((start, end.max(start)))
    }
}

/// Nearest bin of `frequency` on an evenly spaced axis starting at 0
pub fn frequency_to_bin(frequency: f64, axis: &[f64]) -> Option<usize> {
    let last_index = axis.len().checked_sub(1)?;
    let last = axis[last_index];
    if !(last > 0.0) || frequency.is_nan() {
        return Some(0);
    }
    let index = (frequency * last_index as f64 / last).round();
    Some((index.max(0.0) as usize).min(last_index))
}

/// Total power in bins `start..=end`
///
/// # Arguments
/// * `s_pre` - Sum of magnitudes over `averaged` frames
/// * `averaged` - Number of accumulated frames; 0 yields 0
/// * `enbw` - Effective noise bandwidth (Hz)
/// * `sample_rate` - Board sample rate (Hz)
/// * `data_size` - Samples per frame (N)
/// * `start`, `end` - Inclusive bin range; clamped into the spectrum
///
/// # Returns
/// Σ (S/averaged)² · fs / (ENBW · N)
pub fn integrate(
    s_pre: &[f64],
    averaged: usize,
    enbw: f64,
    sample_rate: f64,
    data_size: usize,
    start: usize,
    end: usize,
) -> f64 {
    if averaged == 0 || s_pre.is_empty() || enbw <= 0.0 || data_size == 0 {
        return 0.0;
    }

    let last = s_pre.len() - 1;
    let end = end.min(last);
    let start = start.min(end);
    let n = averaged as f64;
    let scale = sample_rate / (enbw * data_size as f64);

    s_pre[start..=end].iter().map(|s| (s / n).powi(2) * scale).sum()
}
