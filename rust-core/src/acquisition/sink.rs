//! Display and persistence sinks
//!
//! The loop never renders anything itself. It pushes finished frame reports to
//! a [`DisplaySink`] and hands named series to a [`PersistenceSink`] on export.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use thiserror::Error;

use super::runner::RunState;
use crate::filters::ModelMode;
use crate::port::ConnectionState;
use crate::spectrum::{Peak, SpectrumUnit};

/// An (x, y) data series with a display name
#[derive(Debug, Clone, PartialEq)]
pub struct NamedSeries {
    pub name: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl NamedSeries {
    pub fn new(name: impl Into<String>, x: Vec<f64>, y: Vec<f64>) -> Self {
        Self { name: name.into(), x, y }
    }
}

/// Output of one spectrum slot
#[derive(Debug, Clone, PartialEq)]
pub struct SlotReport {
    pub window: String,
    /// Effective noise bandwidth in Hz
    pub enbw: f64,
    pub frequencies: Vec<f64>,
    /// Converted spectrum in the report unit
    pub spectrum: Vec<f64>,
    /// Averaged phase in radians, when phase output is enabled
    pub phase: Option<Vec<f64>>,
    pub peak: Option<Peak>,
}

/// Modelled filter response over the slot 1 axis
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReport {
    pub mode: ModelMode,
    pub frequencies: Vec<f64>,
    pub magnitude: Vec<f64>,
    pub phase: Vec<f64>,
}

/// Everything published after a successful tick
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Sample times in seconds
    pub time: Vec<f64>,
    /// Displayed samples; the averaged impulse response in response modes
    pub samples: Vec<f64>,
    pub unit: SpectrumUnit,
    pub averaged: usize,
    pub slots: [Option<SlotReport>; 2],
    pub model: Option<ModelReport>,
    /// Total power in the configured band (V²)
    pub band_power: Option<f64>,
}

impl FrameReport {
    /// Named series for export, in display order
    pub fn series(&self) -> Vec<NamedSeries> {
        let mut series = vec![NamedSeries::new("Time series", self.time.clone(), self.samples.clone())];

        for slot in self.slots.iter().flatten() {
            series.push(NamedSeries::new(
                format!("{} window ({})", slot.window, self.unit.name()),
                slot.frequencies.clone(),
                slot.spectrum.clone(),
            ));
            if let Some(phase) = &slot.phase {
                series.push(NamedSeries::new(
                    format!("{} window phase", slot.window),
                    slot.frequencies.clone(),
                    phase.clone(),
                ));
            }
        }

        if let Some(model) = &self.model {
            series.push(NamedSeries::new(
                format!("Modeled transfer function ({})", model.mode.name()),
                model.frequencies.clone(),
                model.magnitude.clone(),
            ));
            series.push(NamedSeries::new("Modeled phase", model.frequencies.clone(), model.phase.clone()));
        }
        series
    }
}

/// Receives everything the loop publishes
pub trait DisplaySink: Send {
    /// A finished frame
    fn publish(&mut self, report: &FrameReport);

    /// The port connection changed
    fn connection_changed(&mut self, _state: ConnectionState) {}

    /// The loop changed run state
    fn run_state_changed(&mut self, _state: RunState) {}
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Nothing to export yet")]
    NoData,
}

/// Writes named series somewhere durable
pub trait PersistenceSink: Send {
    fn export(&mut self, path: &Path, series: &[NamedSeries]) -> Result<(), ExportError>;
}

/// Plain-text export: per series one line of x values and one of y values,
/// series separated by a blank line
#[derive(Debug, Clone, Default)]
pub struct CsvExporter;

impl CsvExporter {
    pub fn render(series: &[NamedSeries]) -> String {
        let join = |values: &[f64]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");

        let mut out = String::new();
        for s in series {
            let _ = writeln!(out, "{}", join(&s.x));
            let _ = writeln!(out, "{}", join(&s.y));
            out.push('\n');
        }
        out
    }
}

impl PersistenceSink for CsvExporter {
    fn export(&mut self, path: &Path, series: &[NamedSeries]) -> Result<(), ExportError> {
        let path = path.with_extension("csv");
        std::fs::write(&path, Self::render(series)).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("Exported {} series to {}", series.len(), path.display());
        Ok(())
    }
}

/// Everything a [`ChannelSink`] forwards
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Frame(Box<FrameReport>),
    Connection(ConnectionState),
    RunState(RunState),
}

/// Forwards sink calls over a channel, for a UI running on another thread
#[derive(Clone)]
pub struct ChannelSink {
    tx: Sender<SinkEvent>,
}

/// Create a channel sink and the receiver its events arrive on
pub fn channel_sink() -> (ChannelSink, Receiver<SinkEvent>) {
    let (tx, rx) = channel();
    (ChannelSink { tx }, rx)
}

impl DisplaySink for ChannelSink {
    fn publish(&mut self, report: &FrameReport) {
        // A dropped receiver just means nobody is watching any more
        let _ = self.tx.send(SinkEvent::Frame(Box::new(report.clone())));
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        let _ = self.tx.send(SinkEvent::Connection(state));
    }

    fn run_state_changed(&mut self, state: RunState) {
        let _ = self.tx.send(SinkEvent::RunState(state));
    }
}
