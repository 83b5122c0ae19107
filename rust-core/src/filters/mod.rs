//! Window library, board filter configuration and filter response models

pub mod windows;
pub mod design;
pub mod config;
pub mod model;

pub use windows::{WindowFunction, WindowRegistry, WindowSpec, WindowType};
pub use design::{FirResponse, design_fir, design_fir_windowed};
pub use config::{Arithmetic, FilterConfig, FilterKind, FirParams};
pub use model::{FilterModeler, ModelMode, ModelResponse};
