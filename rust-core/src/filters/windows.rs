//! Window functions for spectral analysis and FIR filter modelling
//!
//! Every window produces coefficients normalized to a mean of 1 together with
//! its ENBW factor (effective noise bandwidth divided by the sample rate).

use std::f64::consts::PI;

/// Flat-top cosine series coefficients
const FLAT_TOP_COEFFS: [f64; 5] = [0.26526, -0.5, 0.23474, 0.0, 0.0];

/// A window function that can be looked up by name
pub trait WindowFunction: Send + Sync {
    /// Name used by the operator and the board protocol (e.g. "Hamming")
    fn name(&self) -> &'static str;

    /// Compute normalized coefficients and the ENBW factor for `length` points
    fn compute(&self, length: usize) -> (Vec<f64>, f64);
}

/// Built-in window function types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    /// Rectangular window: w[k] = 1
    /// ENBW factor is exactly 1/N
    Rectangle,

    /// Hamming window: w[k] = 25/46 - 21/46*cos(2πk/(N-1))
    Hamming,

    /// Flat-top window: w[k] = Σ c_i*cos(i*2πk/(N-1))
    /// Very flat passband, best amplitude accuracy
    FlatTop,
}

impl WindowType {
    /// All built-in windows in display order
    pub const ALL: [WindowType; 3] = [WindowType::Rectangle, WindowType::Hamming, WindowType::FlatTop];

    /// Raw (unnormalized) window shape
    fn raw(&self, length: usize) -> Vec<f64> {
        // N = 1 would divide by zero in the cosine argument
        let span = if length > 1 { (length - 1) as f64 } else { 1.0 };

        match self {
            WindowType::Rectangle => vec![1.0; length],

            WindowType::Hamming => (0..length)
                .map(|k| {
                    let angle = 2.0 * PI * k as f64 / span;
                    25.0 / 46.0 - 21.0 / 46.0 * angle.cos()
                })
                .collect(),

            WindowType::FlatTop => (0..length)
                .map(|k| {
                    let angle = 2.0 * PI * k as f64 / span;
                    FLAT_TOP_COEFFS
                        .iter()
                        .enumerate()
                        .map(|(i, &c)| c * (i as f64 * angle).cos())
                        .sum()
                })
                .collect(),
        }
    }
}

impl WindowFunction for WindowType {
    fn name(&self) -> &'static str {
        match self {
            WindowType::Rectangle => "Rectangle",
            WindowType::Hamming => "Hamming",
            WindowType::FlatTop => "Flat_Top",
        }
    }

    fn compute(&self, length: usize) -> (Vec<f64>, f64) {
        if length == 0 {
            return (Vec::new(), 0.0);
        }

        match self {
            WindowType::Rectangle => (vec![1.0; length], 1.0 / length as f64),
            _ => normalize(self.raw(length)),
        }
    }
}

/// Scale a raw window so its mean is 1 and compute Σw²/(Σw)²
///
/// Shapes whose sum vanishes (flat-top with two points) degrade to the
/// rectangle so the result stays finite.
pub fn normalize(window: Vec<f64>) -> (Vec<f64>, f64) {
    let length = window.len();
    if length == 0 {
        return (window, 0.0);
    }

    let sum: f64 = window.iter().sum();
    if sum.abs() < 1e-12 {
        return (vec![1.0; length], 1.0 / length as f64);
    }

    let factor = length as f64 / sum;
    let normalized: Vec<f64> = window.iter().map(|&w| w * factor).collect();

    let sum: f64 = normalized.iter().sum();
    let sum_sq: f64 = normalized.iter().map(|&w| w * w).sum();

    (normalized, sum_sq / (sum * sum))
}

/// Window coefficients for one length, plus the ENBW factor
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub name: String,
    pub coefficients: Vec<f64>,
    pub enbw_factor: f64,
}

impl WindowSpec {
    /// Number of coefficients
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
}

/// Name → implementation map of the available windows
pub struct WindowRegistry {
    windows: Vec<Box<dyn WindowFunction>>,
}

impl WindowRegistry {
    /// Registry without any window
    pub fn empty() -> Self {
        Self { windows: Vec::new() }
    }

    /// Register a window; a window with the same name is replaced
    pub fn register(&mut self, window: Box<dyn WindowFunction>) {
        let name = window.name();
        if let Some(slot) = self.windows.iter_mut().find(|w| w.name() == name) {
            *slot = window;
        } else {
            self.windows.push(window);
        }
    }

    /// Look up a window by name
    pub fn get(&self, name: &str) -> Option<&dyn WindowFunction> {
        self.windows
            .iter()
            .find(|w| w.name() == name)
            .map(|w| w.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.windows.iter().map(|w| w.name()).collect()
    }

    /// Compute a window by name, `None` if it is not registered
    pub fn compute(&self, name: &str, length: usize) -> Option<WindowSpec> {
        self.get(name).map(|window| {
            let (coefficients, enbw_factor) = window.compute(length);
            WindowSpec {
                name: window.name().to_string(),
                coefficients,
                enbw_factor,
            }
        })
    }

    /// Compute a window by name, falling back to the rectangle for unknown names
    pub fn compute_or_rectangle(&self, name: &str, length: usize) -> WindowSpec {
        self.compute(name, length).unwrap_or_else(|| {
            log::warn!("Unknown window '{}', using Rectangle", name);
            let (coefficients, enbw_factor) = WindowType::Rectangle.compute(length);
            WindowSpec {
                name: WindowType::Rectangle.name().to_string(),
                coefficients,
                enbw_factor,
            }
        })
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for window in WindowType::ALL {
            registry.register(Box::new(window));
        }
        registry
    }
}
