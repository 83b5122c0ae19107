//! Integration tests for the spectral analysis pipeline

use dsmv_spectral::filters::WindowRegistry;
use dsmv_spectral::spectrum::{convert_unit, FrameFormat, PowerBand, SpectrumEngine, SpectrumUnit};
use std::f64::consts::PI;

fn sine(n: usize, freq: f64, fs: f64) -> Vec<f64> {
    (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect()
}

fn format(n: usize, t: usize, fs: f64) -> FrameFormat {
    FrameFormat {
        frame_length: n,
        transform_size: t,
        sample_rate: fs,
        oversamples: 1,
    }
}

#[test]
fn test_psd_peak_at_tone_bin() {
    let registry = WindowRegistry::default();
    let mut engine = SpectrumEngine::new(&registry, "Rectangle", format(100, 50, 1000.0));
    engine.process_frame(&sine(100, 100.0, 1000.0), false).unwrap();

    let psd = engine.convert(SpectrumUnit::PowerSpectralDensity, None);
    let freqs = engine.frequencies();
    assert_eq!(psd.len(), 51);

    let nearest = freqs
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - 100.0).abs().total_cmp(&(b.1 - 100.0).abs()))
        .map(|(i, _)| i)
        .unwrap();
    let max = psd
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();

    assert_eq!(max, nearest);
    assert_eq!(max, 10);
    assert!(psd[9] < psd[10]);
    assert!(psd[11] < psd[10]);
}

#[test]
fn test_window_normalization_all_lengths() {
    let registry = WindowRegistry::default();
    for name in registry.names() {
        for n in [1usize, 2, 10, 1024] {
            let spec = registry.compute(name, n).unwrap();
            let mean = spec.coefficients.iter().sum::<f64>() / n as f64;
            assert!((mean - 1.0).abs() < 1e-9, "{} N={} mean={}", name, n, mean);
        }
    }
}

#[test]
fn test_rectangle_enbw_exact() {
    let registry = WindowRegistry::default();
    for n in [1usize, 3, 100, 4096] {
        let spec = registry.compute("Rectangle", n).unwrap();
        assert_eq!(spec.enbw_factor, 1.0 / n as f64);
    }
}

#[test]
fn test_amplitude_density_scaling() {
    let s_pre = vec![0.5, 2.0, 4.0, 1.0];
    for enbw in [0.1, 1.0, 13.7] {
        let asd = convert_unit(&s_pre, 2, enbw, SpectrumUnit::AmplitudeSpectralDensity, None);
        let amplitude = convert_unit(&s_pre, 2, enbw, SpectrumUnit::AmplitudeSpectrum, None);
        for (d, a) in asd.iter().zip(&amplitude) {
            assert!((d * enbw.sqrt() - a).abs() < 1e-12);
        }
    }
}

#[test]
fn test_averaging_matches_single_frame() {
    let registry = WindowRegistry::default();
    let frame = sine(128, 62.5, 1000.0);

    let mut averaged = SpectrumEngine::new(&registry, "Hamming", format(128, 64, 1000.0));
    for _ in 0..5 {
        averaged.process_frame(&frame, true).unwrap();
    }
    let mut single = SpectrumEngine::new(&registry, "Hamming", format(128, 64, 1000.0));
    single.process_frame(&frame, false).unwrap();

    assert_eq!(averaged.state().averaged, 5);
    let a = averaged.convert(SpectrumUnit::AmplitudeSpectrum, None);
    let s = single.convert(SpectrumUnit::AmplitudeSpectrum, None);
    for (x, y) in a.iter().zip(&s) {
        assert!((x - y).abs() < 1e-12);
    }
}

#[test]
fn test_band_power_concentrated_at_tone() {
    let registry = WindowRegistry::default();
    let mut engine = SpectrumEngine::new(&registry, "Rectangle", format(100, 50, 1000.0));
    engine.process_frame(&sine(100, 100.0, 1000.0), false).unwrap();

    let state = engine.state();
    let power = |band: PowerBand| {
        let (start, end) = band.bin_range(engine.frequencies()).unwrap();
        dsmv_spectral::spectrum::integrate(&state.s_pre, state.averaged, engine.enbw(), 1000.0, 100, start, end)
    };

    assert!(power(PowerBand::new(90.0, 110.0)) > 0.5);
    assert!(power(PowerBand::new(150.0, 500.0)) < 1e-20);
    assert!(power(PowerBand::new(0.0, 80.0)) < 1e-20);
}
