//! FIR kernel design using the windowing method
//!
//! Reproduces the impulse responses the board's FIR filters run with, so the
//! modelled response can be overlaid on the measured spectrum.

use super::windows::WindowRegistry;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Ideal brick-wall response of a FIR filter, frequencies in Hz
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FirResponse {
    Bandpass { lower: f64, upper: f64 },
    Bandstop { lower: f64, upper: f64 },
    Lowpass { cutoff: f64 },
    Highpass { cutoff: f64 },
}

impl FirResponse {
    /// Ideal impulse response at tap offset `k` (relative to the center tap)
    ///
    /// # Arguments
    /// * `k` - Tap offset, 0 is the center
    /// * `processing_rate` - Rate the filter runs at (Hz)
    fn ideal_tap(&self, k: f64, processing_rate: f64) -> f64 {
        let phi = |f: f64| 2.0 * PI * f / processing_rate;
        let center = k.abs() < 1e-10;

        match *self {
            FirResponse::Bandpass { lower, upper } => {
                let (phi1, phi2) = (phi(lower), phi(upper));
                if center {
                    (phi2 - phi1) / PI
                } else {
                    ((phi2 * k).sin() - (phi1 * k).sin()) / (PI * k)
                }
            }
            FirResponse::Bandstop { lower, upper } => {
                let (phi1, phi2) = (phi(lower), phi(upper));
                if center {
                    1.0 - (phi2 - phi1) / PI
                } else {
                    -((phi2 * k).sin() - (phi1 * k).sin()) / (PI * k)
                }
            }
            FirResponse::Lowpass { cutoff } => {
                let phic = phi(cutoff);
                if center {
                    phic / PI
                } else {
                    (phic * k).sin() / (PI * k)
                }
            }
            FirResponse::Highpass { cutoff } => {
                // δ[k] minus the lowpass kernel
                let phic = phi(cutoff);
                if center {
                    1.0 - phic / PI
                } else {
                    -((phic * k).sin() / (PI * k))
                }
            }
        }
    }
}

/// Design an order-`order` FIR kernel (`order + 1` taps, centered)
///
/// # Arguments
/// * `response` - Ideal response to approximate
/// * `order` - Filter order (even)
/// * `processing_rate` - Rate the filter runs at (Hz)
/// * `window` - Window coefficients; must hold `order + 1` values; missing
///   trailing coefficients are treated as 1
///
/// # Returns
/// Filter coefficients h[k] for k = -order/2 ..= order/2
pub fn design_fir(response: FirResponse, order: usize, processing_rate: f64, window: &[f64]) -> Vec<f64> {
    let taps = order + 1;
    let half = order as f64 / 2.0;

    (0..taps)
        .map(|n| {
            let k = n as f64 - half;
            let w = window.get(n).copied().unwrap_or(1.0);
            response.ideal_tap(k, processing_rate) * w
        })
        .collect()
}

/// Design a FIR kernel using a window looked up by name
///
/// Unknown window names fall back to the rectangle.
pub fn design_fir_windowed(
    response: FirResponse,
    order: usize,
    processing_rate: f64,
    window_name: &str,
    registry: &WindowRegistry,
) -> Vec<f64> {
    let window = registry.compute_or_rectangle(window_name, order + 1);
    design_fir(response, order, processing_rate, &window.coefficients)
}

/// Evaluate the DTFT of `h` at the given frequencies
///
/// # Arguments
/// * `h` - Filter coefficients
/// * `frequencies` - Frequencies in Hz
/// * `processing_rate` - Rate the filter runs at (Hz)
///
/// # Returns
/// Complex frequency response H(e^jω)
pub fn frequency_response(h: &[f64], frequencies: &[f64], processing_rate: f64) -> Vec<Complex64> {
    frequencies
        .iter()
        .map(|&f| {
            let omega = 2.0 * PI * f / processing_rate;
            h.iter()
                .enumerate()
                .map(|(n, &h_n)| h_n * Complex64::from_polar(1.0, -(omega * n as f64)))
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::windows::{WindowFunction, WindowType};

    fn hamming(taps: usize) -> Vec<f64> {
        WindowType::Hamming.compute(taps).0
    }

    fn assert_symmetric(h: &[f64]) {
        for i in 0..h.len() / 2 {
            let diff = (h[i] - h[h.len() - 1 - i]).abs();
            assert!(diff < 1e-10, "Not symmetric at index {}: {} vs {}",
                    i, h[i], h[h.len() - 1 - i]);
        }
    }

    #[test]
    fn test_bandpass_center_tap() {
        let fp = 20000.0;
        let h = design_fir(FirResponse::Bandpass { lower: 2000.0, upper: 4000.0 }, 40, fp, &[1.0; 41]);

        assert_eq!(h.len(), 41);
        assert_symmetric(&h);

        // (φ2 - φ1)/π = 2·Δf/fp
        assert!((h[20] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_bandpass_rejects_dc() {
        let fp = 20000.0;
        let h = design_fir(FirResponse::Bandpass { lower: 4000.0, upper: 6000.0 }, 100, fp, &hamming(101));
        assert_symmetric(&h);

        let sum: f64 = h.iter().sum();
        assert!(sum.abs() < 0.05, "DC gain too large: {}", sum);

        let resp = frequency_response(&h, &[5000.0], fp);
        assert!(resp[0].norm() > 0.5);
    }

    #[test]
    fn test_lowpass_design() {
        let fp = 20000.0;
        let window = hamming(81);
        let h = design_fir(FirResponse::Lowpass { cutoff: 2500.0 }, 80, fp, &window);
        assert_eq!(h.len() % 2, 1);
        assert_symmetric(&h);

        // Pass DC, block near Nyquist
        let resp = frequency_response(&h, &[0.0, 9000.0], fp);
        assert!(resp[1].norm() < resp[0].norm() * 0.01);
    }

    #[test]
    fn test_highpass_complements_lowpass() {
        let fp = 20000.0;
        let ones = vec![1.0; 61];
        let lp = design_fir(FirResponse::Lowpass { cutoff: 3000.0 }, 60, fp, &ones);
        let hp = design_fir(FirResponse::Highpass { cutoff: 3000.0 }, 60, fp, &ones);

        // Unwindowed highpass + lowpass = unit impulse
        for (i, (a, b)) in lp.iter().zip(hp.iter()).enumerate() {
            let expected = if i == 30 { 1.0 } else { 0.0 };
            assert!((a + b - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bandstop_complements_bandpass() {
        let fp = 20000.0;
        let ones = vec![1.0; 21];
        let bp = design_fir(FirResponse::Bandpass { lower: 1000.0, upper: 3000.0 }, 20, fp, &ones);
        let bs = design_fir(FirResponse::Bandstop { lower: 1000.0, upper: 3000.0 }, 20, fp, &ones);

        for (i, (a, b)) in bp.iter().zip(bs.iter()).enumerate() {
            let expected = if i == 10 { 1.0 } else { 0.0 };
            assert!((a + b - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_windowed_by_name() {
        let registry = WindowRegistry::default();
        let response = FirResponse::Lowpass { cutoff: 1000.0 };

        let named = design_fir_windowed(response, 20, 20000.0, "Hamming", &registry);
        let direct = design_fir(response, 20, 20000.0, &hamming(21));
        assert_eq!(named, direct);

        let unknown = design_fir_windowed(response, 20, 20000.0, "Nope", &registry);
        let rect = design_fir(response, 20, 20000.0, &[1.0; 21]);
        assert_eq!(unknown, rect);
    }
}
