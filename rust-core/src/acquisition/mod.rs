//! Acquisition loop and the board protocol it speaks

pub mod protocol;
pub mod runner;
pub mod sink;

pub use protocol::{BoardSettings, Command, OperationMode};
pub use runner::{AcquisitionLoop, BoardLink, ConfigChange, LoopHandle, LoopMessage, RunState};
pub use sink::{
    channel_sink, ChannelSink, CsvExporter, DisplaySink, ExportError, FrameReport, ModelReport, NamedSeries,
    PersistenceSink, SinkEvent, SlotReport,
};
