//! DSMV Spectral - acquisition and spectral analysis core for the DSMV lab board
//!
//! Streams frames from the acquisition board over a serial link, computes
//! windowed and averaged spectra, models the response of the board filter and
//! integrates band power. Optional Python bindings serve the lab GUI.

// Suppress PyO3 non-local impl warnings (harmless macro-generated code)
#![cfg_attr(feature = "python", allow(non_local_definitions))]

pub mod acquisition;
pub mod config;
pub mod filters;
pub mod port;
pub mod spectrum;

#[cfg(feature = "python")]
pub mod python_bindings;

pub use acquisition::{AcquisitionLoop, ConfigChange, LoopHandle, LoopMessage, OperationMode, RunState};
pub use config::{AcquisitionConfig, ConfigError};
pub use filters::{FilterConfig, FilterModeler, ModelMode, WindowRegistry, WindowType};
pub use port::{ConnectionState, PortError, PortSelector, StreamingPort, SystemSerial};
pub use spectrum::{SpectrumEngine, SpectrumUnit};
