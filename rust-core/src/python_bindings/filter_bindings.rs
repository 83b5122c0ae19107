//! Python bindings for windows, FIR design and filter models

use numpy::{PyArray1, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::filters::{
    design_fir_windowed, Arithmetic, FilterConfig, FilterKind, FilterModeler, ModelMode, WindowRegistry,
};

/// Compute a window by name
///
/// Returns:
///     (coefficients, enbw_factor); coefficients have mean 1
#[pyfunction]
pub fn compute_window<'py>(py: Python<'py>, name: &str, length: usize) -> PyResult<(&'py PyArray1<f64>, f64)> {
    let spec = WindowRegistry::default()
        .compute(name, length)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown window '{}'", name)))?;
    Ok((PyArray1::from_vec(py, spec.coefficients), spec.enbw_factor))
}

/// Names of the available windows
#[pyfunction]
pub fn window_names() -> Vec<&'static str> {
    WindowRegistry::default().names()
}

/// Windowed FIR kernel of a FIR filter kind
///
/// Args:
///     filter_kind: Board filter name, e.g. "FIR bandpass filter"
///     params: Dict with "cutoff" or "lower"/"upper", plus "order" and "window"
///     processing_rate: Rate the filter runs at (Hz)
#[pyfunction]
pub fn design_fir<'py>(
    py: Python<'py>,
    filter_kind: &str,
    params: &PyDict,
    processing_rate: f64,
) -> PyResult<&'py PyArray1<f64>> {
    let filter = filter_from_params(filter_kind, params)?;
    let (response, fir) = match (filter.fir_response(), filter.fir_params()) {
        (Some(response), Some(fir)) => (response, fir),
        _ => return Err(PyValueError::new_err(format!("'{}' is not a FIR filter", filter_kind))),
    };
    let kernel = design_fir_windowed(
        response,
        fir.order,
        processing_rate,
        &fir.window,
        &WindowRegistry::default(),
    );
    Ok(PyArray1::from_vec(py, kernel))
}

/// Modelled response of a board filter
///
/// Args:
///     filter_kind: Board filter name
///     params: Filter parameters ("gain", "taps", "cutoff", "lower", "upper",
///         "order", "window", "arithmetic")
///     mode: "H(z)" or "H(s)"
///     frequencies: Model axis in Hz, without the DC bin
///     processing_rate: Rate the filter runs at (Hz)
///
/// Returns:
///     (magnitude, phase), or None when the model is not available
#[pyfunction]
pub fn model_response<'py>(
    py: Python<'py>,
    filter_kind: &str,
    params: &PyDict,
    mode: &str,
    frequencies: PyReadonlyArray1<f64>,
    processing_rate: f64,
) -> PyResult<Option<(&'py PyArray1<f64>, &'py PyArray1<f64>)>> {
    let filter = filter_from_params(filter_kind, params)?;
    let mode = ModelMode::from_name(mode)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown model mode '{}'", mode)))?;
    let freqs = frequencies
        .as_slice()
        .map_err(|e| PyValueError::new_err(e.to_string()))?;

    let response = FilterModeler::default().model(&filter, mode, freqs, processing_rate);
    Ok(response.map(|r| (PyArray1::from_vec(py, r.magnitude), PyArray1::from_vec(py, r.phase))))
}

/// Build a clamped filter configuration from a kind name and a parameter dict
fn filter_from_params(kind: &str, params: &PyDict) -> PyResult<FilterConfig> {
    let kind = FilterKind::from_board_name(kind)
        .ok_or_else(|| PyValueError::new_err(format!("Unknown filter '{}'", kind)))?;

    let mut filter = FilterConfig::default_for(kind);
    match &mut filter {
        FilterConfig::Scaling { gain } => set(params, "gain", gain)?,
        FilterConfig::MovingAverage { taps } => set(params, "taps", taps)?,
        FilterConfig::LowPass1 { cutoff }
        | FilterConfig::HighPass1 { cutoff }
        | FilterConfig::LowPass2 { cutoff }
        | FilterConfig::LowPass3 { cutoff } => set(params, "cutoff", cutoff)?,
        FilterConfig::FirBandpass { lower, upper, .. } | FilterConfig::FirBandstop { lower, upper, .. } => {
            set(params, "lower", lower)?;
            set(params, "upper", upper)?;
        }
        FilterConfig::FirLowpass { cutoff, .. } | FilterConfig::FirHighpass { cutoff, .. } => {
            set(params, "cutoff", cutoff)?
        }
        FilterConfig::ProgrammableIir => {}
    }

    if let Some(fir) = fir_params_mut(&mut filter) {
        set(params, "order", &mut fir.order)?;
        set(params, "window", &mut fir.window)?;
        if let Some(value) = params.get_item("arithmetic")? {
            let name: String = value.extract()?;
            fir.arithmetic = Arithmetic::from_name(&name)
                .ok_or_else(|| PyValueError::new_err(format!("Unknown arithmetic '{}'", name)))?;
        }
    }
    Ok(filter.clamped())
}

fn fir_params_mut(filter: &mut FilterConfig) -> Option<&mut crate::filters::FirParams> {
    match filter {
        FilterConfig::FirBandpass { fir, .. }
        | FilterConfig::FirBandstop { fir, .. }
        | FilterConfig::FirLowpass { fir, .. }
        | FilterConfig::FirHighpass { fir, .. } => Some(fir),
        _ => None,
    }
}

/// Overwrite `target` with `params[key]` if present
fn set<T: for<'a> FromPyObject<'a>>(params: &PyDict, key: &str, target: &mut T) -> PyResult<()> {
    if let Some(value) = params.get_item(key)? {
        *target = value.extract()?;
    }
    Ok(())
}
