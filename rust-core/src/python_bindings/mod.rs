//! PyO3 bindings for the Python lab GUI

use pyo3::prelude::*;

mod filter_bindings;
mod spectrum_bindings;

/// Python module definition
#[pymodule]
fn dsmv_spectral(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<spectrum_bindings::PySpectrumEngine>()?;
    m.add_function(wrap_pyfunction!(spectrum_bindings::integrate_power, m)?)?;

    m.add_function(wrap_pyfunction!(filter_bindings::compute_window, m)?)?;
    m.add_function(wrap_pyfunction!(filter_bindings::window_names, m)?)?;
    m.add_function(wrap_pyfunction!(filter_bindings::design_fir, m)?)?;
    m.add_function(wrap_pyfunction!(filter_bindings::model_response, m)?)?;

    Ok(())
}
