//! Python bindings for spectrum analysis

use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::filters::WindowRegistry;
use crate::spectrum::{self, FrameFormat, SpectrumEngine, SpectrumUnit};

/// One spectrum slot exposed to Python
#[pyclass(name = "SpectrumEngine")]
pub struct PySpectrumEngine {
    engine: SpectrumEngine,
}

#[pymethods]
impl PySpectrumEngine {
    /// Create a spectrum slot
    ///
    /// Args:
    ///     window: Window name ("Rectangle", "Hamming", "Flat_Top")
    ///     frame_length: Samples per frame (N)
    ///     transform_size: Bins above DC; defaults to N/2
    ///     sample_rate: Board sample rate in Hz
    ///     oversamples: Oversampling factor
    #[new]
    #[pyo3(signature = (window="Rectangle", frame_length=100, transform_size=None, sample_rate=1000.0, oversamples=1))]
    fn new(
        window: &str,
        frame_length: usize,
        transform_size: Option<usize>,
        sample_rate: f64,
        oversamples: u32,
    ) -> PyResult<Self> {
        let registry = WindowRegistry::default();
        if !registry.contains(window) {
            return Err(PyValueError::new_err(format!("Unknown window '{}'", window)));
        }
        let format = FrameFormat {
            frame_length,
            transform_size: transform_size.unwrap_or(frame_length / 2),
            sample_rate,
            oversamples,
        };
        Ok(Self {
            engine: SpectrumEngine::new(&registry, window, format),
        })
    }

    /// Window, transform and accumulate one frame
    ///
    /// Args:
    ///     samples: Frame of frame_length samples
    ///     averaging: Add to the running average instead of replacing it
    ///     subtract_mean: Remove the DC component first
    #[pyo3(signature = (samples, averaging=false, subtract_mean=false))]
    fn process_frame(&mut self, samples: PyReadonlyArray1<f64>, averaging: bool, subtract_mean: bool) -> PyResult<()> {
        let mut frame = samples
            .as_slice()
            .map_err(|e| PyValueError::new_err(e.to_string()))?
            .to_vec();
        if subtract_mean {
            spectrum::subtract_mean(&mut frame);
        }
        self.engine
            .process_frame(&frame, averaging)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// Averaged spectrum in a display unit
    ///
    /// Args:
    ///     unit: "Power Spectral Density", "Power Spectrum", "Amplitude Spectral
    ///         Density", "Amplitude Spectrum" or "Normalized Spectrum"
    ///     norm_index: Reference bin for the normalized spectrum (default: maximum)
    #[pyo3(signature = (unit, norm_index=None))]
    fn convert<'py>(&self, py: Python<'py>, unit: &str, norm_index: Option<usize>) -> PyResult<&'py PyArray1<f64>> {
        let unit = SpectrumUnit::from_name(unit)
            .ok_or_else(|| PyValueError::new_err(format!("Unknown unit '{}'", unit)))?;
        Ok(PyArray1::from_vec(py, self.engine.convert(unit, norm_index)))
    }

    /// Averaged phase in radians
    fn phase<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        PyArray1::from_vec(py, self.engine.state().mean_phase())
    }

    /// Frequency axis in Hz, 0 to Nyquist
    fn frequencies<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        PyArray1::from_slice(py, self.engine.frequencies())
    }

    /// Effective noise bandwidth in Hz
    fn enbw(&self) -> f64 {
        self.engine.enbw()
    }

    /// Number of accumulated frames
    fn averaged(&self) -> usize {
        self.engine.state().averaged
    }

    /// Total power between two frequencies (Hz)
    fn band_power(&self, start: f64, end: f64) -> f64 {
        let format = self.engine.format();
        let state = self.engine.state();
        spectrum::PowerBand::new(start, end)
            .bin_range(self.engine.frequencies())
            .map_or(0.0, |(first, last)| {
                spectrum::integrate(
                    &state.s_pre,
                    state.averaged,
                    self.engine.enbw(),
                    format.sample_rate,
                    format.frame_length,
                    first,
                    last,
                )
            })
    }

    /// Clear the running average
    fn reset(&mut self) {
        self.engine.reset();
    }
}

/// Power in bins start..=end of an accumulated magnitude spectrum
#[pyfunction]
#[allow(clippy::too_many_arguments)]
pub fn integrate_power(
    s_pre: PyReadonlyArray1<f64>,
    averaged: usize,
    enbw: f64,
    sample_rate: f64,
    data_size: usize,
    start: usize,
    end: usize,
) -> PyResult<f64> {
    let s_pre = s_pre.as_slice().map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(spectrum::integrate(s_pre, averaged, enbw, sample_rate, data_size, start, end))
}
