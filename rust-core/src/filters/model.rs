//! Filter response modeler
//!
//! Computes the expected magnitude and phase of the configured board filter,
//! either as the discrete-time transfer function H(z) evaluated at the
//! processing rate or as its continuous-time counterpart H(s). The model axis
//! is the measured frequency axis without its DC bin.

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::Arc;

use super::config::FilterConfig;
use super::design::design_fir_windowed;
use super::windows::WindowRegistry;

/// Which representation of the filter to model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelMode {
    #[default]
    Disabled,
    #[serde(rename = "H(z)")]
    Hz,
    #[serde(rename = "H(s)")]
    Hs,
}

impl ModelMode {
    pub fn name(&self) -> &'static str {
        match self {
            ModelMode::Disabled => "Disabled",
            ModelMode::Hz => "H(z)",
            ModelMode::Hs => "H(s)",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Disabled" => Some(ModelMode::Disabled),
            "H(z)" => Some(ModelMode::Hz),
            "H(s)" => Some(ModelMode::Hs),
            _ => None,
        }
    }

    /// Whether this mode can be shown for the given filter
    pub fn supported_for(&self, filter: &FilterConfig) -> bool {
        match self {
            ModelMode::Disabled => true,
            ModelMode::Hz => filter.kind().supports_hz(),
            ModelMode::Hs => filter.kind().supports_hs(),
        }
    }

    /// Mode to fall back to when the filter changes: keep the current mode if
    /// possible, else switch to the other model, else disable
    pub fn fallback_for(&self, filter: &FilterConfig) -> Self {
        if self.supported_for(filter) {
            return *self;
        }
        let other = match self {
            ModelMode::Hz => ModelMode::Hs,
            ModelMode::Hs => ModelMode::Hz,
            ModelMode::Disabled => return ModelMode::Disabled,
        };
        if other.supported_for(filter) {
            other
        } else {
            ModelMode::Disabled
        }
    }
}

/// Modelled response over the model axis (bins 1..=T)
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub frequencies: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
}

/// Evaluates filter models; owns the window registry and FFT plans it needs
pub struct FilterModeler {
    registry: WindowRegistry,
    /// Forward plans by length; plans are `Send + Sync`, planners are not
    plans: HashMap<usize, Arc<dyn Fft<f64>>>,
}

impl Default for FilterModeler {
    fn default() -> Self {
        Self::new(WindowRegistry::default())
    }
}

impl FilterModeler {
    pub fn new(registry: WindowRegistry) -> Self {
        Self {
            registry,
            plans: HashMap::new(),
        }
    }

    pub fn registry(&self) -> &WindowRegistry {
        &self.registry
    }

    /// Model `filter` over `frequencies`
    ///
    /// # Arguments
    /// * `filter` - Current board filter
    /// * `mode` - H(z) or H(s)
    /// * `frequencies` - Model axis in Hz, the measured axis without DC (length T)
    /// * `processing_rate` - Rate the board filter runs at (Hz)
    ///
    /// # Returns
    /// `None` when the mode is disabled, unsupported for this filter, or the
    /// parameters leave the model undefined (e.g. a zero low-pass cutoff)
    pub fn model(
        &mut self,
        filter: &FilterConfig,
        mode: ModelMode,
        frequencies: &[f64],
        processing_rate: f64,
    ) -> Option<ModelResponse> {
        if mode == ModelMode::Disabled || !mode.supported_for(filter) {
            return None;
        }
        if frequencies.is_empty() || !(processing_rate > 0.0) {
            return None;
        }

        let transform_size = frequencies.len();
        let norm_index = filter
            .norm_bin(transform_size, processing_rate)
            .map(|bin| bin.saturating_sub(1).min(transform_size - 1));
        let fp = processing_rate;

        let (magnitude, phase) = match filter {
            FilterConfig::Scaling { gain } => {
                let magnitude = vec![gain.abs(); transform_size];
                let phase = (1..=transform_size)
                    .map(|k| -2.0 * PI * k as f64 / transform_size as f64)
                    .collect();
                (magnitude, phase)
            }

            FilterConfig::MovingAverage { taps } => {
                let n = *taps as f64;
                let h: Vec<Complex64> = frequencies
                    .iter()
                    .map(|&f| {
                        let den = Complex64::from_polar(1.0, 2.0 * PI * f / fp) - 1.0;
                        if den.norm() < 1e-12 {
                            Complex64::new(n, 0.0)
                        } else {
                            (Complex64::from_polar(1.0, 2.0 * PI * f * n / fp) - 1.0) / den
                        }
                    })
                    .collect();
                // Causal phase: the board averages past samples
                let phase = h.iter().map(|c| -c.arg()).collect();
                (normalize(&h, norm_index), phase)
            }

            FilterConfig::LowPass1 { cutoff } => lowpass(*cutoff, 1, mode, frequencies, fp, norm_index)?,
            FilterConfig::LowPass2 { cutoff } => lowpass(*cutoff, 2, mode, frequencies, fp, norm_index)?,
            FilterConfig::LowPass3 { cutoff } => lowpass(*cutoff, 3, mode, frequencies, fp, norm_index)?,

            FilterConfig::HighPass1 { cutoff } => {
                let fc = *cutoff;
                let h: Vec<Complex64> = frequencies
                    .iter()
                    .map(|&f| match mode {
                        ModelMode::Hs => 1.0 / (1.0 - Complex64::new(0.0, fc / f)),
                        _ => {
                            let diff = 1.0 - Complex64::from_polar(1.0, -2.0 * PI * f / fp);
                            1.0 / (1.0 + (2.0 * PI * fc / fp) / diff)
                        }
                    })
                    .collect();
                let phase = h.iter().map(|c| c.arg()).collect();
                (normalize(&h, norm_index), phase)
            }

            FilterConfig::FirBandpass { .. }
            | FilterConfig::FirBandstop { .. }
            | FilterConfig::FirLowpass { .. }
            | FilterConfig::FirHighpass { .. } => {
                let response = filter.fir_response()?;
                let params = filter.fir_params()?;
                let kernel = design_fir_windowed(response, params.order, fp, &params.window, &self.registry);
                let h = self.kernel_response(&kernel, transform_size);
                let phase = h.iter().map(|c| c.arg()).collect();
                (normalize(&h, norm_index), phase)
            }

            FilterConfig::ProgrammableIir => return None,
        };

        Some(ModelResponse {
            frequencies: frequencies.to_vec(),
            magnitude,
            phase,
        })
    }

    /// FFT of the kernel over 2T points, bins 1..=T
    fn kernel_response(&mut self, kernel: &[f64], transform_size: usize) -> Vec<Complex64> {
        let n = 2 * transform_size;
        let fft = Arc::clone(
            self.plans
                .entry(n)
                .or_insert_with(|| FftPlanner::<f64>::new().plan_fft_forward(n)),
        );

        // Kernels longer than the transform are truncated
        let mut buffer = vec![Complex64::new(0.0, 0.0); n];
        for (slot, &tap) in buffer.iter_mut().zip(kernel.iter()) {
            *slot = Complex64::new(tap, 0.0);
        }
        fft.process(&mut buffer);

        buffer[1..=transform_size].to_vec()
    }
}

/// First-order low-pass raised to `order`
fn lowpass(
    cutoff: f64,
    order: i32,
    mode: ModelMode,
    frequencies: &[f64],
    fp: f64,
    norm_index: Option<usize>,
) -> Option<(Vec<f64>, Vec<f64>)> {
    if cutoff == 0.0 {
        return None;
    }

    let h: Vec<Complex64> = frequencies
        .iter()
        .map(|&f| {
            let first = match mode {
                ModelMode::Hs => 1.0 / (1.0 + Complex64::new(0.0, f / cutoff)),
                _ => {
                    let diff = 1.0 - Complex64::from_polar(1.0, -2.0 * PI * f / fp);
                    1.0 / (1.0 + fp / (2.0 * PI * cutoff) * diff)
                }
            };
            first.powi(order)
        })
        .collect();

    let phase = h.iter().map(|c| c.arg()).collect();
    Some((normalize(&h, norm_index), phase))
}

/// |H| divided by |H| at the reference index, or by the maximum when there is none
///
/// A vanishing reference leaves the magnitude unscaled.
fn normalize(h: &[Complex64], norm_index: Option<usize>) -> Vec<f64> {
    let magnitude: Vec<f64> = h.iter().map(|c| c.norm()).collect();
    let reference = match norm_index {
        Some(index) => magnitude.get(index).copied().unwrap_or(0.0),
        None => magnitude.iter().cloned().fold(0.0, f64::max),
    };

    if reference > f64::EPSILON && reference.is_finite() {
        magnitude.iter().map(|m| m / reference).collect()
    } else {
        magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::config::{FilterKind, FirParams};

    const FP: f64 = 20000.0;

    /// Model axis for a response measurement at the processing rate
    fn axis(transform_size: usize) -> Vec<f64> {
        (1..=transform_size)
            .map(|k| k as f64 * FP / 2.0 / transform_size as f64)
            .collect()
    }

    #[test]
    fn test_unsupported_modes_return_none() {
        let mut modeler = FilterModeler::default();
        let f = axis(64);

        let iir = FilterConfig::ProgrammableIir;
        assert!(modeler.model(&iir, ModelMode::Hz, &f, FP).is_none());
        assert!(modeler.model(&iir, ModelMode::Hs, &f, FP).is_none());

        let fir = FilterConfig::default_for(FilterKind::FirLowpass);
        assert!(modeler.model(&fir, ModelMode::Hs, &f, FP).is_none());

        let scaling = FilterConfig::Scaling { gain: 1.0 };
        assert!(modeler.model(&scaling, ModelMode::Disabled, &f, FP).is_none());
    }

    #[test]
    fn test_zero_cutoff_lowpass_disables_model() {
        let mut modeler = FilterModeler::default();
        let f = axis(64);
        for filter in [
            FilterConfig::LowPass1 { cutoff: 0.0 },
            FilterConfig::LowPass2 { cutoff: 0.0 },
            FilterConfig::LowPass3 { cutoff: 0.0 },
        ] {
            assert!(modeler.model(&filter, ModelMode::Hz, &f, FP).is_none());
            assert!(modeler.model(&filter, ModelMode::Hs, &f, FP).is_none());
        }
    }

    #[test]
    fn test_scaling_model() {
        let mut modeler = FilterModeler::default();
        let f = axis(10);
        let model = modeler.model(&FilterConfig::Scaling { gain: -2.5 }, ModelMode::Hz, &f, FP).unwrap();

        assert!(model.magnitude.iter().all(|&m| m == 2.5));
        assert!((model.phase[0] + 2.0 * PI / 10.0).abs() < 1e-12);
        assert!((model.phase[9] + 2.0 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_lowpass_normalized_at_first_bin() {
        let mut modeler = FilterModeler::default();
        let f = axis(100);
        let filter = FilterConfig::LowPass1 { cutoff: 500.0 };

        for mode in [ModelMode::Hz, ModelMode::Hs] {
            let model = modeler.model(&filter, mode, &f, FP).unwrap();
            assert_eq!(model.magnitude.len(), 100);
            assert!((model.magnitude[0] - 1.0).abs() < 1e-12);

            // Monotonically falling
            for w in model.magnitude.windows(2) {
                assert!(w[1] < w[0]);
            }
        }
    }

    #[test]
    fn test_analog_lowpass_cutoff_is_minus_3db() {
        let mut modeler = FilterModeler::default();
        let f = vec![1e-3, 1000.0];
        let model = modeler.model(&FilterConfig::LowPass1 { cutoff: 1000.0 }, ModelMode::Hs, &f, FP).unwrap();
        assert!((model.magnitude[1] - 0.5f64.sqrt()).abs() < 1e-6);
        assert!((model.phase[1] + PI / 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_higher_order_lowpass_is_power_of_first() {
        let mut modeler = FilterModeler::default();
        let f = axis(50);
        let first = modeler.model(&FilterConfig::LowPass1 { cutoff: 800.0 }, ModelMode::Hz, &f, FP).unwrap();
        let third = modeler.model(&FilterConfig::LowPass3 { cutoff: 800.0 }, ModelMode::Hz, &f, FP).unwrap();

        for (a, b) in first.magnitude.iter().zip(third.magnitude.iter()) {
            assert!((a.powi(3) - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_highpass_normalized_at_last_bin() {
        let mut modeler = FilterModeler::default();
        let f = axis(80);
        let model = modeler.model(&FilterConfig::HighPass1 { cutoff: 2000.0 }, ModelMode::Hz, &f, FP).unwrap();
        assert!((model.magnitude[79] - 1.0).abs() < 1e-12);
        assert!(model.magnitude[0] < 0.1);
    }

    #[test]
    fn test_moving_average_nulls() {
        let mut modeler = FilterModeler::default();
        // 4 taps at 20 kHz: first null at 5 kHz
        let f = axis(100);
        let model = modeler.model(&FilterConfig::MovingAverage { taps: 4 }, ModelMode::Hz, &f, FP).unwrap();
        let null_index = 49; // 5000 Hz
        assert!((f[null_index] - 5000.0).abs() < 1e-9);
        assert!(model.magnitude[null_index] < 1e-9);
        assert!((model.magnitude[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fir_lowpass_model() {
        let mut modeler = FilterModeler::default();
        let f = axis(128);
        let filter = FilterConfig::FirLowpass {
            cutoff: 2000.0,
            fir: FirParams { order: 60, window: "Hamming".to_string(), ..FirParams::default() },
        };
        let model = modeler.model(&filter, ModelMode::Hz, &f, FP).unwrap();

        assert_eq!(model.magnitude.len(), 128);
        assert!((model.magnitude[0] - 1.0).abs() < 1e-12);

        // Passband ~1, stopband well attenuated
        let pass = f.iter().position(|&x| x >= 1000.0).unwrap();
        let stop = f.iter().position(|&x| x >= 5000.0).unwrap();
        assert!((model.magnitude[pass] - 1.0).abs() < 0.05);
        assert!(model.magnitude[stop] < 0.01);
    }

    #[test]
    fn test_fir_bandpass_peaks_at_center() {
        let mut modeler = FilterModeler::default();
        let f = axis(100);
        let filter = FilterConfig::FirBandpass {
            lower: 3000.0,
            upper: 5000.0,
            fir: FirParams { order: 80, window: "Hamming".to_string(), ..FirParams::default() },
        };
        let model = modeler.model(&filter, ModelMode::Hz, &f, FP).unwrap();

        // Reference bin round(8000/20000·100) = 40, array index 39
        assert!((model.magnitude[39] - 1.0).abs() < 1e-12);
        assert!(model.magnitude[5] < 0.01);
        assert!(model.magnitude[90] < 0.01);
    }

    #[test]
    fn test_fallback_mode() {
        let fir = FilterConfig::default_for(FilterKind::FirHighpass);
        assert_eq!(ModelMode::Hs.fallback_for(&fir), ModelMode::Hz);
        assert_eq!(ModelMode::Hz.fallback_for(&FilterConfig::ProgrammableIir), ModelMode::Disabled);
        assert_eq!(ModelMode::Hs.fallback_for(&FilterConfig::Scaling { gain: 1.0 }), ModelMode::Hs);
    }
}
