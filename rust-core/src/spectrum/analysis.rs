//! Spectrum engine
//!
//! Windows each frame, transforms it, keeps running sums of magnitude and phase
//! and converts the averaged spectrum into the selected display unit.

use serde::{Deserialize, Serialize};

use super::fft::{frequency_axis, FftEngine};
use super::windowing::apply_window;
use super::SpectrumError;
use crate::filters::windows::{WindowRegistry, WindowSpec};

/// Display unit of a converted spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpectrumUnit {
    #[default]
    #[serde(rename = "Power Spectral Density")]
    PowerSpectralDensity,
    #[serde(rename = "Power Spectrum")]
    PowerSpectrum,
    #[serde(rename = "Amplitude Spectral Density")]
    AmplitudeSpectralDensity,
    #[serde(rename = "Amplitude Spectrum")]
    AmplitudeSpectrum,
    #[serde(rename = "Normalized Spectrum")]
    Normalized,
}

impl SpectrumUnit {
    pub const ALL: [SpectrumUnit; 5] = [
        SpectrumUnit::PowerSpectralDensity,
        SpectrumUnit::PowerSpectrum,
        SpectrumUnit::AmplitudeSpectralDensity,
        SpectrumUnit::AmplitudeSpectrum,
        SpectrumUnit::Normalized,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpectrumUnit::PowerSpectralDensity => "Power Spectral Density",
            SpectrumUnit::PowerSpectrum => "Power Spectrum",
            SpectrumUnit::AmplitudeSpectralDensity => "Amplitude Spectral Density",
            SpectrumUnit::AmplitudeSpectrum => "Amplitude Spectrum",
            SpectrumUnit::Normalized => "Normalized Spectrum",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|u| u.name() == name)
    }
}

/// Running sums of magnitude and phase over `averaged` frames
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpectrumState {
    pub s_pre: Vec<f64>,
    pub phase_pre: Vec<f64>,
    pub averaged: usize,
}

impl SpectrumState {
    /// Zeroed state with `bins` bins
    pub fn new(bins: usize) -> Self {
        Self {
            s_pre: vec![0.0; bins],
            phase_pre: vec![0.0; bins],
            averaged: 0,
        }
    }

    /// Zero the sums and the frame count
    pub fn reset(&mut self) {
        self.s_pre.fill(0.0);
        self.phase_pre.fill(0.0);
        self.averaged = 0;
    }

    /// Add one frame's magnitude and phase
    ///
    /// Without averaging the sums are replaced and the count is 1. A frame
    /// with a different bin count restarts the sums.
    pub fn accumulate(&mut self, magnitude: &[f64], phase: &[f64], averaging: bool) {
        if !averaging || self.s_pre.len() != magnitude.len() {
            self.s_pre = magnitude.to_vec();
            self.phase_pre = phase.to_vec();
            self.averaged = 1;
            return;
        }

        for (s, m) in self.s_pre.iter_mut().zip(magnitude) {
            *s += m;
        }
        for (p, x) in self.phase_pre.iter_mut().zip(phase) {
            *p += x;
        }
        self.averaged += 1;
    }

    /// S_Pre / averaged, zeros before the first frame
    pub fn mean_magnitude(&self) -> Vec<f64> {
        mean(&self.s_pre, self.averaged)
    }

    /// phase_Pre / averaged, zeros before the first frame
    pub fn mean_phase(&self) -> Vec<f64> {
        mean(&self.phase_pre, self.averaged)
    }
}

fn mean(sums: &[f64], count: usize) -> Vec<f64> {
    if count == 0 {
        return vec![0.0; sums.len()];
    }
    let n = count as f64;
    sums.iter().map(|s| s / n).collect()
}

/// Convert accumulated magnitudes into a display unit
///
/// # Arguments
/// * `s_pre` - Sum of magnitudes over `averaged` frames
/// * `averaged` - Number of accumulated frames; 0 yields all zeros
/// * `enbw` - Effective noise bandwidth in Hz
/// * `unit` - Target unit
/// * `norm_index` - Reference bin for the normalized spectrum; `None` divides by the maximum
pub fn convert_unit(
    s_pre: &[f64],
    averaged: usize,
    enbw: f64,
    unit: SpectrumUnit,
    norm_index: Option<usize>,
) -> Vec<f64> {
    let zeros = || vec![0.0; s_pre.len()];
    if averaged == 0 {
        return zeros();
    }
    let n = averaged as f64;

    match unit {
        SpectrumUnit::PowerSpectralDensity => {
            if enbw <= 0.0 {
                return zeros();
            }
            s_pre.iter().map(|s| (s / n).powi(2) / enbw).collect()
        }
        SpectrumUnit::PowerSpectrum => s_pre.iter().map(|s| (s / n).powi(2)).collect(),
        SpectrumUnit::AmplitudeSpectralDensity => {
            if enbw <= 0.0 {
                return zeros();
            }
            let root = enbw.sqrt();
            s_pre.iter().map(|s| s / n / root).collect()
        }
        SpectrumUnit::AmplitudeSpectrum => s_pre.iter().map(|s| s / n).collect(),
        SpectrumUnit::Normalized => {
            let reference = match norm_index {
                Some(index) => s_pre.get(index).copied().unwrap_or(0.0),
                None => s_pre.iter().cloned().fold(0.0, f64::max),
            };
            if reference > 0.0 {
                s_pre.iter().map(|s| s / reference).collect()
            } else {
                zeros()
            }
        }
    }
}

/// Location and value of the largest point of a series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub frequency: f64,
    pub value: f64,
}

/// Find the maximum of `values`; NaNs are ignored
pub fn find_peak(frequencies: &[f64], values: &[f64]) -> Option<Peak> {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .and_then(|(index, value)| {
            frequencies.get(index).map(|&frequency| Peak { index, frequency, value })
        })
}

/// Acquisition parameters a spectrum depends on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameFormat {
    /// Samples per frame (N)
    pub frame_length: usize,
    /// Bins above DC (T)
    pub transform_size: usize,
    pub sample_rate: f64,
    pub oversamples: u32,
}

/// One spectrum slot: a window, its FFT engine and its accumulator
pub struct SpectrumEngine {
    window: WindowSpec,
    fft: FftEngine,
    state: SpectrumState,
    format: FrameFormat,
    frequencies: Vec<f64>,
}

impl SpectrumEngine {
    /// Create a slot; unknown window names fall back to the rectangle
    pub fn new(registry: &WindowRegistry, window_name: &str, format: FrameFormat) -> Self {
        let window = registry.compute_or_rectangle(window_name, format.frame_length);
        let fft = FftEngine::new(format.transform_size);
        let format = FrameFormat {
            transform_size: fft.transform_size(),
            oversamples: format.oversamples.max(1),
            ..format
        };
        let frequencies = frequency_axis(format.transform_size, format.sample_rate, format.oversamples);
        let state = SpectrumState::new(fft.num_bins());

        Self {
            window,
            fft,
            state,
            format,
            frequencies,
        }
    }

    /// Change window or frame format; the accumulator is always reset
    pub fn reconfigure(&mut self, registry: &WindowRegistry, window_name: &str, format: FrameFormat) {
        *self = Self::new(registry, window_name, format);
    }

    /// Window, transform and accumulate one frame
    ///
    /// # Arguments
    /// * `samples` - Frame of `frame_length` samples (DC already removed if wanted)
    /// * `averaging` - Add to the running sums instead of replacing them
    pub fn process_frame(&mut self, samples: &[f64], averaging: bool) -> Result<(), SpectrumError> {
        let windowed = apply_window(samples, &self.window)?;
        let spectrum = self.fft.transform(&windowed, samples.len())?;

        let magnitude: Vec<f64> = spectrum.iter().map(|c| c.norm()).collect();
        let phase: Vec<f64> = spectrum.iter().map(|c| c.arg()).collect();
        self.state.accumulate(&magnitude, &phase, averaging);
        Ok(())
    }

    /// ENBW in Hz: window factor times the effective sample rate
    pub fn enbw(&self) -> f64 {
        self.window.enbw_factor * self.format.sample_rate / self.format.oversamples as f64
    }

    /// Averaged spectrum in `unit`
    pub fn convert(&self, unit: SpectrumUnit, norm_index: Option<usize>) -> Vec<f64> {
        convert_unit(&self.state.s_pre, self.state.averaged, self.enbw(), unit, norm_index)
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }

    pub fn state(&self) -> &SpectrumState {
        &self.state
    }

    pub fn window(&self) -> &WindowSpec {
        &self.window
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Frequency axis, 0 to Nyquist, T + 1 points
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn format(n: usize, t: usize) -> FrameFormat {
        FrameFormat {
            frame_length: n,
            transform_size: t,
            sample_rate: 1000.0,
            oversamples: 1,
        }
    }

    fn sine(n: usize, freq: f64, fs: f64) -> Vec<f64> {
        (0..n).map(|k| (2.0 * PI * freq * k as f64 / fs).sin()).collect()
    }

    #[test]
    fn test_reset_is_idempotent() {
        let registry = WindowRegistry::default();
        let mut engine = SpectrumEngine::new(&registry, "Hamming", format(100, 50));
        engine.process_frame(&sine(100, 100.0, 1000.0), true).unwrap();

        engine.reset();
        let once = engine.state().clone();
        engine.reset();
        assert_eq!(engine.state(), &once);
        assert_eq!(once.averaged, 0);
        assert!(once.s_pre.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_averaging_same_frame() {
        let registry = WindowRegistry::default();
        let frame = sine(100, 123.0, 1000.0);

        let mut single = SpectrumEngine::new(&registry, "Hamming", format(100, 64));
        single.process_frame(&frame, false).unwrap();

        let mut averaged = SpectrumEngine::new(&registry, "Hamming", format(100, 64));
        for _ in 0..5 {
            averaged.process_frame(&frame, true).unwrap();
        }
        assert_eq!(averaged.state().averaged, 5);

        let a = single.state().mean_magnitude();
        let b = averaged.state().mean_magnitude();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-12);
        }
    }

    #[test]
    fn test_no_averaging_replaces() {
        let registry = WindowRegistry::default();
        let mut engine = SpectrumEngine::new(&registry, "Rectangle", format(100, 50));
        engine.process_frame(&sine(100, 100.0, 1000.0), false).unwrap();
        engine.process_frame(&sine(100, 200.0, 1000.0), false).unwrap();
        assert_eq!(engine.state().averaged, 1);

        let s = engine.convert(SpectrumUnit::AmplitudeSpectrum, None);
        assert!((s[20] - 1.0).abs() < 1e-9);
        assert!(s[10] < 1e-9);
    }

    #[test]
    fn test_convert_before_first_frame_is_zero() {
        for unit in SpectrumUnit::ALL {
            let out = convert_unit(&[0.0; 5], 0, 1.0, unit, Some(1));
            assert_eq!(out, vec![0.0; 5]);
        }
    }

    #[test]
    fn test_asd_times_root_enbw_is_as() {
        let s_pre = vec![0.5, 2.0, 3.5, 0.0];
        for enbw in [0.01, 1.0, 13.6] {
            let asd = convert_unit(&s_pre, 3, enbw, SpectrumUnit::AmplitudeSpectralDensity, None);
            let amp = convert_unit(&s_pre, 3, enbw, SpectrumUnit::AmplitudeSpectrum, None);
            for (d, a) in asd.iter().zip(amp.iter()) {
                assert!((d * enbw.sqrt() - a).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_unit_formulas() {
        let s_pre = vec![2.0, 4.0];
        let psd = convert_unit(&s_pre, 2, 0.5, SpectrumUnit::PowerSpectralDensity, None);
        assert_eq!(psd, vec![2.0, 8.0]);

        let ps = convert_unit(&s_pre, 2, 0.5, SpectrumUnit::PowerSpectrum, None);
        assert_eq!(ps, vec![1.0, 4.0]);

        let norm = convert_unit(&s_pre, 2, 0.5, SpectrumUnit::Normalized, Some(0));
        assert_eq!(norm, vec![1.0, 2.0]);

        let norm_max = convert_unit(&s_pre, 2, 0.5, SpectrumUnit::Normalized, None);
        assert_eq!(norm_max, vec![0.5, 1.0]);
    }

    #[test]
    fn test_enbw_scales_with_rate() {
        let registry = WindowRegistry::default();
        let rect = SpectrumEngine::new(&registry, "Rectangle", format(100, 50));
        assert!((rect.enbw() - 10.0).abs() < 1e-12);

        let oversampled = SpectrumEngine::new(
            &registry,
            "Rectangle",
            FrameFormat { oversamples: 4, ..format(100, 50) },
        );
        assert!((oversampled.enbw() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_find_peak() {
        let freqs = [0.0, 10.0, 20.0, 30.0];
        let peak = find_peak(&freqs, &[1.0, f64::NAN, 5.0, 2.0]).unwrap();
        assert_eq!(peak.index, 2);
        assert_eq!(peak.frequency, 20.0);
        assert!(find_peak(&freqs, &[]).is_none());
    }

    #[test]
    fn test_unit_names() {
        for unit in SpectrumUnit::ALL {
            assert_eq!(SpectrumUnit::from_name(unit.name()), Some(unit));
        }
    }
}
