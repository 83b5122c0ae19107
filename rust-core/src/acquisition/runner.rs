//! Acquisition loop
//!
//! A single consumer drains a mailbox of control messages and, between
//! messages, runs acquisition ticks. Configuration changes and frame reads are
//! therefore strictly ordered: a change never lands in the middle of a frame.
//!
//! Each tick: check the connection, request a frame if none is outstanding,
//! try a non-blocking read of exactly one frame, then decode, analyse and
//! publish it.

use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use super::protocol::{decode_frame, filter_commands, mode_commands, BoardSettings, Command, OperationMode};
use super::sink::{DisplaySink, ExportError, FrameReport, ModelReport, PersistenceSink, SlotReport};
use crate::config::{AcquisitionConfig, SlotSettings, DISABLED_WINDOW};
use crate::filters::{FilterConfig, FilterModeler, ModelMode, WindowRegistry};
use crate::port::{ConnectionState, PortError, ReadError, StreamingPort};
use crate::spectrum::{find_peak, integrate, subtract_mean, FrameFormat, PowerBand, SampleBuffer, SpectrumEngine, SpectrumUnit};

/// Acquisition state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Disconnected,
}

/// The operations the loop needs from the board connection
pub trait BoardLink: Send {
    fn write_line(&mut self, line: &str) -> Result<(), PortError>;
    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError>;
    fn clear_buffer(&mut self, keep_partial_line: bool);
    fn connection(&self) -> ConnectionState;
    /// Monotonic count of completed reconnects
    fn reconnect_count(&self) -> u64;
}

impl BoardLink for StreamingPort {
    fn write_line(&mut self, line: &str) -> Result<(), PortError> {
        StreamingPort::write_line(self, line)
    }

    fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        StreamingPort::read_bytes(self, n)
    }

    fn clear_buffer(&mut self, keep_partial_line: bool) {
        StreamingPort::clear_buffer(self, keep_partial_line)
    }

    fn connection(&self) -> ConnectionState {
        self.state()
    }

    fn reconnect_count(&self) -> u64 {
        StreamingPort::reconnect_count(self)
    }
}

/// A single configuration change
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    SampleRate(f64),
    DataSize(usize),
    Oversamples(u32),
    ProcessingRate(f64),
    Mode(OperationMode),
    Filter(FilterConfig),
    /// Window of slot 0 or 1; "Disabled" switches the slot off
    Window { slot: usize, window: String },
    /// Transform size of a slot; `None` locks it to half the frame length
    TransformSize { slot: usize, size: Option<usize> },
    Unit(SpectrumUnit),
    Averaging(bool),
    SubtractMean(bool),
    Phase(bool),
    PowerBand(Option<PowerBand>),
    Model(ModelMode),
}

/// Mailbox messages
#[derive(Debug, Clone, PartialEq)]
pub enum LoopMessage {
    Start,
    Pause,
    Configure(ConfigChange),
    /// Clear the averaged spectra
    Reset,
    /// Hand the latest series to the persistence sink
    Export(PathBuf),
    Shutdown,
}

/// Sending half of the mailbox
#[derive(Clone, Debug)]
pub struct LoopHandle {
    tx: Sender<LoopMessage>,
}

impl LoopHandle {
    /// Queue a message; `false` once the loop has exited
    pub fn send(&self, message: LoopMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(LoopMessage::Start)
    }

    pub fn pause(&self) -> bool {
        self.send(LoopMessage::Pause)
    }

    pub fn configure(&self, change: ConfigChange) -> bool {
        self.send(LoopMessage::Configure(change))
    }

    pub fn export(&self, path: impl Into<PathBuf>) -> bool {
        self.send(LoopMessage::Export(path.into()))
    }

    pub fn shutdown(&self) -> bool {
        self.send(LoopMessage::Shutdown)
    }
}

/// Time-domain accumulator for response measurements
#[derive(Debug, Default)]
struct TimeAverage {
    sum: Vec<f64>,
    frames: usize,
}

impl TimeAverage {
    fn add(&mut self, frame: &[f64], averaging: bool) {
        if averaging && self.sum.len() == frame.len() {
            self.sum.iter_mut().zip(frame).for_each(|(s, x)| *s += x);
            self.frames += 1;
        } else {
            self.sum = frame.to_vec();
            self.frames = 1;
        }
    }

    fn mean(&self) -> Vec<f64> {
        let n = self.frames.max(1) as f64;
        self.sum.iter().map(|s| s / n).collect()
    }

    fn reset(&mut self) {
        self.sum.clear();
        self.frames = 0;
    }
}

/// Mailbox-driven acquisition loop
pub struct AcquisitionLoop<L: BoardLink> {
    link: L,
    config: AcquisitionConfig,
    /// Also owns the window registry used by the spectrum slots
    modeler: FilterModeler,
    slots: [Option<SpectrumEngine>; 2],
    buffer: SampleBuffer,
    time_average: TimeAverage,
    display: Box<dyn DisplaySink>,
    exporter: Option<Box<dyn PersistenceSink>>,
    rx: Receiver<LoopMessage>,
    run_state: RunState,
    /// State to return to after a reconnect
    resume_state: RunState,
    connection: ConnectionState,
    /// Link reconnect count the board configuration was last sent for
    reconnects: u64,
    read_next: bool,
    last_report: Option<FrameReport>,
}

impl<L: BoardLink> AcquisitionLoop<L> {
    /// Create a loop and the handle that controls it
    ///
    /// # Arguments
    /// * `link` - Connection to the board
    /// * `config` - Initial settings; clamped before use
    /// * `display` - Receives frame reports and state changes
    pub fn new(link: L, config: AcquisitionConfig, display: Box<dyn DisplaySink>) -> (Self, LoopHandle) {
        Self::with_registry(link, config, display, WindowRegistry::default())
    }

    /// Same as [`new`](Self::new) with a custom window registry
    pub fn with_registry(
        link: L,
        config: AcquisitionConfig,
        display: Box<dyn DisplaySink>,
        registry: WindowRegistry,
    ) -> (Self, LoopHandle) {
        let (tx, rx) = channel();
        let mut config = config.clamped();
        if !config.board.mode.is_spectral() {
            force_response_layout(&mut config);
        }
        config.analysis.model = allowed_model(&config, config.analysis.model);

        let connection = link.connection();
        let reconnects = link.reconnect_count();
        let mut acquisition = Self {
            link,
            buffer: SampleBuffer::new(config.board.data_size),
            config,
            modeler: FilterModeler::new(registry),
            slots: [None, None],
            time_average: TimeAverage::default(),
            display,
            exporter: None,
            rx,
            run_state: RunState::Idle,
            resume_state: RunState::Idle,
            connection,
            reconnects,
            read_next: true,
            last_report: None,
        };
        acquisition.rebuild_slots();
        (acquisition, LoopHandle { tx })
    }

    /// Attach a persistence sink for export requests
    pub fn with_exporter(mut self, exporter: Box<dyn PersistenceSink>) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    /// Averaged frame count of the first enabled slot
    pub fn averaged(&self) -> usize {
        self.slots.iter().flatten().next().map_or(0, |s| s.state().averaged)
    }

    /// Send the full board configuration
    pub fn initialize(&mut self) {
        log::info!("Initializing board configuration");
        self.send_board_configuration();
    }

    /// Run until a shutdown message arrives or every handle is dropped
    pub fn run(mut self) {
        self.initialize();
        let interval = self.config.runtime.tick_interval();

        loop {
            match self.rx.recv_timeout(interval) {
                Ok(message) => {
                    if !self.handle_message(message) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.tick();
        }
        log::debug!("Acquisition loop stopped");
    }

    /// Run on a dedicated thread
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>>
    where
        L: 'static,
    {
        thread::Builder::new()
            .name("dsmv-acquisition".to_string())
            .spawn(move || self.run())
    }

    /// Drain every queued message without blocking
    ///
    /// # Returns
    /// `false` if a shutdown was requested
    pub fn process_pending(&mut self) -> bool {
        while let Ok(message) = self.rx.try_recv() {
            if !self.handle_message(message) {
                return false;
            }
        }
        true
    }

    /// Apply one mailbox message
    ///
    /// # Returns
    /// `false` for [`LoopMessage::Shutdown`]
    pub fn handle_message(&mut self, message: LoopMessage) -> bool {
        match message {
            LoopMessage::Start => self.start(),
            LoopMessage::Pause => self.pause(),
            LoopMessage::Configure(change) => self.apply(change),
            LoopMessage::Reset => self.reset_spectra(),
            LoopMessage::Export(path) => {
                if let Err(e) = self.export(&path) {
                    log::warn!("Export failed: {}", e);
                }
            }
            LoopMessage::Shutdown => return false,
        }
        true
    }

    fn start(&mut self) {
        match self.run_state {
            RunState::Disconnected => self.resume_state = RunState::Running,
            RunState::Idle => {
                self.read_next = true;
                self.set_run_state(RunState::Running);
            }
            RunState::Running => {}
        }
    }

    fn pause(&mut self) {
        match self.run_state {
            RunState::Disconnected => self.resume_state = RunState::Idle,
            RunState::Running => self.set_run_state(RunState::Idle),
            RunState::Idle => {}
        }
    }

    fn set_run_state(&mut self, state: RunState) {
        if self.run_state != state {
            log::debug!("Run state {:?} -> {:?}", self.run_state, state);
            self.run_state = state;
            self.display.run_state_changed(state);
        }
    }

    /// One acquisition step
    ///
    /// # Returns
    /// `true` if a frame was published
    pub fn tick(&mut self) -> bool {
        self.check_connection();
        if self.run_state != RunState::Running {
            return false;
        }

        if self.read_next {
            self.send(Command::SendData);
            self.read_next = false;
        }

        let bytes = match self.link.read_bytes(self.config.board.frame_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        // Late or extra data from the same request is stale
        self.link.clear_buffer(false);
        self.read_next = true;

        let board = &self.config.board;
        let frame = match decode_frame(&bytes, board.data_size, board.channels) {
            Some(mut channels) if !channels.is_empty() => channels.swap_remove(0),
            _ => return false,
        };
        self.process_frame(frame)
    }

    /// Track port state: remember the run state on disconnect, restore the
    /// board configuration and the run state on reconnect
    ///
    /// A drop and reopen that both happen between two ticks only shows up in
    /// the link's reconnect count; it gets the same restore.
    fn check_connection(&mut self) {
        let connection = self.link.connection();
        if connection != self.connection {
            self.connection = connection;
            self.display.connection_changed(connection);
        }

        if connection != ConnectionState::Connected {
            if self.run_state != RunState::Disconnected {
                log::warn!("Connection lost");
                self.resume_state = self.run_state;
                self.set_run_state(RunState::Disconnected);
            }
            return;
        }

        let reconnects = self.link.reconnect_count();
        let missed_reconnect = reconnects != self.reconnects;
        if self.run_state == RunState::Disconnected || missed_reconnect {
            if missed_reconnect && self.run_state != RunState::Disconnected {
                log::warn!("Connection dropped and recovered between ticks");
            }
            self.reconnects = reconnects;
            log::info!("Restoring settings");
            self.send_board_configuration();
            self.reset_spectra();
            if self.run_state == RunState::Disconnected {
                let resume = self.resume_state;
                self.set_run_state(resume);
            }
        }
    }

    fn send_board_configuration(&mut self) {
        for command in self.config.board.restore_commands() {
            self.send(command);
        }
        self.after_change();
    }

    fn send(&mut self, command: Command) {
        let line = command.to_string();
        if let Err(e) = self.link.write_line(&line) {
            log::debug!("Could not send '{}': {}", line, e);
        }
    }

    /// Every change invalidates whatever is buffered and any outstanding request
    fn after_change(&mut self) {
        self.link.clear_buffer(false);
        self.read_next = true;
    }

    fn apply(&mut self, change: ConfigChange) {
        log::debug!("Configuration change: {:?}", change);
        let spectral = self.config.board.mode.is_spectral();

        match change {
            ConfigChange::SampleRate(rate) => {
                if !spectral {
                    log::debug!("Sample rate follows the processing rate in response modes");
                    return;
                }
                self.update_board(|board| board.sample_rate = rate);
                self.send(Command::SetSampleRate(self.config.board.sample_rate));
            }
            ConfigChange::DataSize(size) => {
                self.update_board(|board| board.data_size = size);
                self.send(Command::SetDataSize(self.config.board.data_size));
            }
            ConfigChange::Oversamples(n) => {
                self.update_board(|board| board.oversamples = n);
                self.send(Command::SetOversamples(self.config.board.oversamples));
            }
            ConfigChange::ProcessingRate(rate) => {
                self.update_board(|board| board.processing_rate = rate);
                self.send(Command::SetProcessingRate(self.config.board.processing_rate));
                if !spectral {
                    self.send(Command::SetSampleRate(self.config.board.sample_rate));
                }
            }
            ConfigChange::Mode(mode) => {
                self.update_board(|board| board.mode = mode);
                let mut commands = mode_commands(mode);
                if !mode.is_spectral() {
                    force_response_layout(&mut self.config);
                    // Rate goes out before the mode switch
                    let set_mode = commands.pop();
                    commands.push(Command::SetSampleRate(self.config.board.sample_rate));
                    commands.extend(set_mode);
                }
                self.config.analysis.model = allowed_model(&self.config, self.config.analysis.model);
                for command in commands {
                    self.send(command);
                }
            }
            ConfigChange::Filter(filter) => {
                self.update_board(|board| board.filter = filter);
                self.config.analysis.model = allowed_model(&self.config, self.config.analysis.model);
                for command in filter_commands(&self.config.board.filter) {
                    self.send(command);
                }
            }
            ConfigChange::Window { slot, window } => {
                if !spectral {
                    log::debug!("Windows are fixed in response modes");
                    return;
                }
                if window != DISABLED_WINDOW && !self.modeler.registry().contains(&window) {
                    log::warn!("Unknown window '{}'", window);
                    return;
                }
                match self.slot_settings_mut(slot) {
                    Some(settings) => settings.window = window,
                    None => return,
                }
            }
            ConfigChange::TransformSize { slot, size } => match self.slot_settings_mut(slot) {
                Some(settings) => settings.transform_size = size,
                None => return,
            },
            ConfigChange::Unit(unit) => {
                self.config.analysis.unit = unit;
                return;
            }
            ConfigChange::Averaging(on) => self.config.analysis.averaging = on,
            ConfigChange::SubtractMean(on) => self.config.analysis.subtract_mean = on,
            ConfigChange::Phase(on) => {
                self.config.analysis.phase = on;
                return;
            }
            ConfigChange::PowerBand(band) => {
                self.config.analysis.power_band = band;
                return;
            }
            ConfigChange::Model(mode) => {
                let allowed = allowed_model(&self.config, mode);
                if allowed != mode {
                    log::debug!("Model {} is not available, using {}", mode.name(), allowed.name());
                }
                self.config.analysis.model = allowed;
                return;
            }
        }

        // Everything above changes what is measured
        self.config = self.config.clamped();
        self.rebuild_slots();
        self.after_change();
    }

    fn update_board(&mut self, update: impl FnOnce(&mut BoardSettings)) {
        update(&mut self.config.board);
        self.config.board = self.config.board.clamped();
    }

    fn slot_settings_mut(&mut self, slot: usize) -> Option<&mut SlotSettings> {
        match slot {
            0 => Some(&mut self.config.analysis.slot1),
            1 => Some(&mut self.config.analysis.slot2),
            _ => {
                log::warn!("No spectrum slot {}", slot);
                None
            }
        }
    }

    /// Recreate both spectrum slots from the current settings; clears all averages
    fn rebuild_slots(&mut self) {
        let board = &self.config.board;
        let registry = self.modeler.registry();
        let build = |settings: &SlotSettings| {
            settings.is_enabled().then(|| {
                SpectrumEngine::new(
                    registry,
                    &settings.window,
                    FrameFormat {
                        frame_length: board.data_size,
                        transform_size: settings.effective_transform_size(board.data_size),
                        sample_rate: board.sample_rate,
                        oversamples: board.oversamples,
                    },
                )
            })
        };
        self.slots = [build(&self.config.analysis.slot1), build(&self.config.analysis.slot2)];
        self.time_average.reset();
    }

    fn reset_spectra(&mut self) {
        for engine in self.slots.iter_mut().flatten() {
            engine.reset();
        }
        self.time_average.reset();
    }

    /// Analyse one decoded frame and publish the report
    fn process_frame(&mut self, mut samples: Vec<f64>) -> bool {
        if self.config.analysis.subtract_mean {
            subtract_mean(&mut samples);
        }
        if !self.frame_is_sane(&samples) {
            self.set_run_state(RunState::Idle);
            return false;
        }

        let analysis = &self.config.analysis;
        let board = &self.config.board;
        let spectral = board.mode.is_spectral();

        self.buffer.replace(&samples);
        self.time_average.add(&samples, analysis.averaging && !spectral);

        for engine in self.slots.iter_mut().flatten() {
            if let Err(e) = engine.process_frame(self.buffer.as_slice(), analysis.averaging) {
                log::warn!("Skipping frame: {}", e);
                return false;
            }
        }

        let slots = [
            self.slots[0].as_ref().map(|e| slot_report(e, &self.config, &analysis.slot1.window)),
            self.slots[1].as_ref().map(|e| slot_report(e, &self.config, &analysis.slot2.window)),
        ];

        let band_power = match (analysis.power_band, self.slots[0].as_ref()) {
            (Some(band), Some(engine)) => band.bin_range(engine.frequencies()).map(|(start, end)| {
                let state = engine.state();
                integrate(
                    &state.s_pre,
                    state.averaged,
                    engine.enbw(),
                    board.sample_rate,
                    board.data_size,
                    start,
                    end,
                )
            }),
            _ => None,
        };

        let model = match self.slots[0].as_ref() {
            Some(engine) if analysis.model != ModelMode::Disabled => {
                let axis = &engine.frequencies()[1..];
                self.modeler
                    .model(&board.filter, analysis.model, axis, board.processing_rate)
                    .map(|response| ModelReport {
                        mode: analysis.model,
                        frequencies: response.frequencies,
                        magnitude: response.magnitude,
                        phase: response.phase,
                    })
            }
            _ => None,
        };

        let step = board.oversamples as f64 / board.sample_rate;
        let displayed = if spectral { samples } else { self.time_average.mean() };
        let report = FrameReport {
            time: (0..displayed.len()).map(|i| i as f64 * step).collect(),
            samples: displayed,
            unit: analysis.unit,
            averaged: self.averaged(),
            slots,
            model,
            band_power,
        };

        self.display.publish(&report);
        self.last_report = Some(report);
        true
    }

    /// A desynchronised read shows up as non-finite values or absurd magnitudes
    fn frame_is_sane(&self, samples: &[f64]) -> bool {
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            log::error!("There was a misread: sample {} is {}", index, samples[index]);
            return false;
        }

        let limit = self.config.analysis.sanity_limit;
        let peak = samples.iter().fold(0.0f64, |m, s| m.max(s.abs()));
        if peak > limit {
            log::error!("There was a misread: sample magnitude {} exceeds {}", peak, limit);
            return false;
        }
        true
    }

    fn export(&mut self, path: &std::path::Path) -> Result<(), ExportError> {
        let report = self.last_report.as_ref().ok_or(ExportError::NoData)?;
        match self.exporter.as_mut() {
            Some(exporter) => exporter.export(path, &report.series()),
            None => {
                log::warn!("No persistence sink attached");
                Ok(())
            }
        }
    }
}

/// Response measurements use one rectangular slot, normalized output and the model
fn force_response_layout(config: &mut AcquisitionConfig) {
    config.board.sample_rate = config.board.processing_rate;
    config.analysis.slot1.window = "Rectangle".to_string();
    config.analysis.slot2 = SlotSettings::disabled();
    config.analysis.unit = SpectrumUnit::Normalized;
    if config.analysis.model == ModelMode::Disabled {
        config.analysis.model = ModelMode::Hz;
    }
}

/// Model mode that can actually be shown: none in spectral modes, otherwise
/// the requested one or its fallback for the current filter
fn allowed_model(config: &AcquisitionConfig, requested: ModelMode) -> ModelMode {
    if config.board.mode.is_spectral() {
        ModelMode::Disabled
    } else {
        requested.fallback_for(&config.board.filter)
    }
}

fn slot_report(engine: &SpectrumEngine, config: &AcquisitionConfig, window: &str) -> SlotReport {
    let analysis = &config.analysis;
    let board = &config.board;
    let transform_size = engine.format().transform_size;

    let norm_index = board.filter.norm_bin(transform_size, board.processing_rate);
    let mut frequencies = engine.frequencies().to_vec();
    let mut spectrum = engine.convert(analysis.unit, norm_index);
    let mut phase = analysis.phase.then(|| engine.state().mean_phase());

    // Response spectra start at the first bin above DC
    if !board.mode.is_spectral() {
        frequencies.remove(0);
        spectrum.remove(0);
        if let Some(phase) = phase.as_mut() {
            phase.remove(0);
        }
    }

    SlotReport {
        window: window.to_string(),
        enbw: engine.enbw(),
        peak: find_peak(&frequencies, &spectrum),
        frequencies,
        spectrum,
        phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::protocol::encode_frame;
    use crate::acquisition::sink::{channel_sink, NamedSeries, SinkEvent};
    use crate::filters::FirParams;
    use std::collections::VecDeque;
    use std::f64::consts::PI;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct BoardState {
        written: Vec<String>,
        pending: VecDeque<u8>,
        frame: Vec<f64>,
        disconnected: bool,
        /// Requests go unanswered
        muted: bool,
        reconnects: u64,
    }

    /// Answers "send data" with the configured frame
    #[derive(Clone, Default)]
    struct ScriptedBoard {
        state: Arc<Mutex<BoardState>>,
    }

    impl ScriptedBoard {
        fn with_frame(frame: Vec<f64>) -> Self {
            let board = Self::default();
            board.state.lock().unwrap().frame = frame;
            board
        }

        fn written(&self) -> Vec<String> {
            self.state.lock().unwrap().written.clone()
        }

        fn clear_written(&self) {
            self.state.lock().unwrap().written.clear();
        }

        fn set_frame(&self, frame: Vec<f64>) {
            self.state.lock().unwrap().frame = frame;
        }

        fn set_disconnected(&self, disconnected: bool) {
            self.state.lock().unwrap().disconnected = disconnected;
        }

        fn set_muted(&self, muted: bool) {
            self.state.lock().unwrap().muted = muted;
        }

        /// Drop and reopen the link without ever reporting a disconnect
        fn bounce(&self) {
            let mut state = self.state.lock().unwrap();
            state.pending.clear();
            state.reconnects += 1;
        }
    }

    impl BoardLink for ScriptedBoard {
        fn write_line(&mut self, line: &str) -> Result<(), PortError> {
            let mut state = self.state.lock().unwrap();
            if state.disconnected {
                return Err(PortError::Closed);
            }
            state.written.push(line.to_string());
            if line == "send data" && !state.muted {
                let bytes = encode_frame(&state.frame);
                state.pending.extend(bytes);
            }
            Ok(())
        }

        fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
            let mut state = self.state.lock().unwrap();
            if state.pending.len() < n {
                return Err(ReadError::NotEnoughData);
            }
            Ok(state.pending.drain(..n).collect())
        }

        fn clear_buffer(&mut self, _keep_partial_line: bool) {
            self.state.lock().unwrap().pending.clear();
        }

        fn connection(&self) -> ConnectionState {
            if self.state.lock().unwrap().disconnected {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Connected
            }
        }

        fn reconnect_count(&self) -> u64 {
            self.state.lock().unwrap().reconnects
        }
    }

    fn sine(n: usize, freq: f64, fs: f64) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / fs).sin()).collect()
    }

    fn new_loop(board: &ScriptedBoard, config: AcquisitionConfig) -> (AcquisitionLoop<ScriptedBoard>, std::sync::mpsc::Receiver<SinkEvent>) {
        let (sink, events) = channel_sink();
        let (acquisition, _handle) = AcquisitionLoop::new(board.clone(), config, Box::new(sink));
        (acquisition, events)
    }

    fn frames(events: &std::sync::mpsc::Receiver<SinkEvent>) -> Vec<FrameReport> {
        events
            .try_iter()
            .filter_map(|e| match e {
                SinkEvent::Frame(frame) => Some(*frame),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initialize_sends_configuration() {
        let board = ScriptedBoard::default();
        let (mut acquisition, _events) = new_loop(&board, AcquisitionConfig::default());
        acquisition.initialize();

        let written = board.written();
        assert_eq!(written[0], "set samplerate 1000.0");
        assert_eq!(written[1], "set dataSize 100");
        assert_eq!(written[2], "set oversamples 1");
        assert_eq!(written.last().map(String::as_str), Some("set filterProperty1 1.0"));
    }

    #[test]
    fn test_idle_loop_does_not_request_data() {
        let board = ScriptedBoard::with_frame(vec![0.0; 100]);
        let (mut acquisition, _events) = new_loop(&board, AcquisitionConfig::default());
        assert!(!acquisition.tick());
        assert!(board.written().is_empty());
    }

    #[test]
    fn test_running_tick_publishes_spectrum() {
        let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
        let (mut acquisition, events) = new_loop(&board, AcquisitionConfig::default());

        acquisition.handle_message(LoopMessage::Start);
        assert!(acquisition.tick());
        assert_eq!(board.written(), vec!["send data".to_string()]);

        let reports = frames(&events);
        assert_eq!(reports.len(), 1);
        let slot = reports[0].slots[0].as_ref().unwrap();
        assert_eq!(slot.spectrum.len(), 51);
        let peak = slot.peak.unwrap();
        assert_eq!(peak.index, 10);
        assert!((peak.frequency - 100.0).abs() < 1e-9);
        assert!(reports[0].slots[1].is_none());
        assert!(reports[0].model.is_none());
    }

    #[test]
    fn test_averaging_accumulates_until_changed() {
        let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
        let mut config = AcquisitionConfig::default();
        config.analysis.averaging = true;
        let (mut acquisition, _events) = new_loop(&board, config);

        acquisition.handle_message(LoopMessage::Start);
        for _ in 0..3 {
            assert!(acquisition.tick());
        }
        assert_eq!(acquisition.averaged(), 3);

        acquisition.handle_message(LoopMessage::Configure(ConfigChange::DataSize(200)));
        assert_eq!(acquisition.averaged(), 0);
        assert!(board.written().contains(&"set dataSize 200".to_string()));
    }

    #[test]
    fn test_sanity_violation_pauses() {
        let mut frame = sine(100, 100.0, 1000.0);
        frame[3] = 1000.0;
        let board = ScriptedBoard::with_frame(frame);
        let (mut acquisition, events) = new_loop(&board, AcquisitionConfig::default());

        acquisition.handle_message(LoopMessage::Start);
        assert!(!acquisition.tick());
        assert_eq!(acquisition.run_state(), RunState::Idle);
        assert!(frames(&events).is_empty());
    }

    #[test]
    fn test_reconnect_restores_settings_and_run_state() {
        let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
        let (mut acquisition, _events) = new_loop(&board, AcquisitionConfig::default());
        acquisition.handle_message(LoopMessage::Start);
        assert!(acquisition.tick());

        board.set_disconnected(true);
        assert!(!acquisition.tick());
        assert_eq!(acquisition.run_state(), RunState::Disconnected);

        board.set_disconnected(false);
        board.clear_written();
        assert!(acquisition.tick());
        assert_eq!(acquisition.run_state(), RunState::Running);

        let written = board.written();
        assert_eq!(written[0], "set samplerate 1000.0");
        assert_eq!(written.last().map(String::as_str), Some("send data"));
    }

    #[test]
    fn test_reconnect_between_ticks_restores_settings() {
        let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
        let mut config = AcquisitionConfig::default();
        config.analysis.averaging = true;
        let (mut acquisition, _events) = new_loop(&board, config);
        acquisition.handle_message(LoopMessage::Start);
        assert!(acquisition.tick());
        assert!(acquisition.tick());
        assert_eq!(acquisition.averaged(), 2);

        // The request is lost, then the link drops and comes back unseen
        board.set_muted(true);
        assert!(!acquisition.tick());
        board.bounce();
        board.set_muted(false);
        board.clear_written();

        assert!(acquisition.tick());
        assert_eq!(acquisition.run_state(), RunState::Running);
        assert_eq!(acquisition.averaged(), 1);

        let written = board.written();
        assert_eq!(written[0], "set samplerate 1000.0");
        assert_eq!(written.last().map(String::as_str), Some("send data"));

        // Restored once per reconnect
        board.clear_written();
        assert!(acquisition.tick());
        assert_eq!(board.written(), vec!["send data".to_string()]);
    }

    #[test]
    fn test_non_finite_frame_pauses_without_accumulating() {
        let mut frame = sine(100, 100.0, 1000.0);
        frame[3] = f64::NAN;
        let board = ScriptedBoard::with_frame(frame);
        let mut config = AcquisitionConfig::default();
        config.analysis.averaging = true;
        let (mut acquisition, events) = new_loop(&board, config);

        acquisition.handle_message(LoopMessage::Start);
        assert!(!acquisition.tick());
        assert_eq!(acquisition.run_state(), RunState::Idle);
        assert!(frames(&events).is_empty());

        board.set_frame(sine(100, 100.0, 1000.0));
        acquisition.handle_message(LoopMessage::Start);
        for _ in 0..3 {
            assert!(acquisition.tick());
        }
        assert_eq!(acquisition.averaged(), 3);

        let report = frames(&events).pop().unwrap();
        let slot = report.slots[0].as_ref().unwrap();
        assert!(slot.spectrum.iter().all(|v| v.is_finite()));
        assert_eq!(slot.peak.unwrap().index, 10);
    }

    #[test]
    fn test_sanity_check_follows_mean_subtraction() {
        let offset: Vec<f64> = sine(100, 100.0, 1000.0).iter().map(|x| x + 150.0).collect();
        let mut spike = vec![150.0; 100];
        spike[40] = 400.0;

        // (frame, subtract mean, published)
        let cases = [
            (offset.clone(), true, true),
            (offset, false, false),
            (spike.clone(), true, false),
            (spike, false, false),
        ];

        for (frame, subtract, published) in cases {
            let board = ScriptedBoard::with_frame(frame);
            let mut config = AcquisitionConfig::default();
            config.analysis.subtract_mean = subtract;
            let (mut acquisition, _events) = new_loop(&board, config);

            acquisition.handle_message(LoopMessage::Start);
            assert_eq!(acquisition.tick(), published, "subtract_mean = {}", subtract);
            let expected = if published { RunState::Running } else { RunState::Idle };
            assert_eq!(acquisition.run_state(), expected);
        }
    }

    #[test]
    fn test_which_changes_reset_averaging() {
        let cases = [
            (ConfigChange::Window { slot: 0, window: "Hamming".to_string() }, true),
            (ConfigChange::TransformSize { slot: 0, size: Some(25) }, true),
            (ConfigChange::Filter(FilterConfig::LowPass1 { cutoff: 100.0 }), true),
            (ConfigChange::SubtractMean(true), true),
            (ConfigChange::SampleRate(2000.0), true),
            (ConfigChange::Unit(SpectrumUnit::PowerSpectrum), false),
            (ConfigChange::Phase(true), false),
            (ConfigChange::PowerBand(Some(PowerBand::new(50.0, 150.0))), false),
            (ConfigChange::Model(ModelMode::Hz), false),
        ];

        for (change, resets) in cases {
            let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
            let mut config = AcquisitionConfig::default();
            config.analysis.averaging = true;
            let (mut acquisition, _events) = new_loop(&board, config);

            acquisition.handle_message(LoopMessage::Start);
            for _ in 0..3 {
                assert!(acquisition.tick());
            }

            let label = format!("{:?}", change);
            acquisition.handle_message(LoopMessage::Configure(change));
            let expected = if resets { 0 } else { 3 };
            assert_eq!(acquisition.averaged(), expected, "{}", label);

            assert!(acquisition.tick(), "{}", label);
            assert_eq!(acquisition.averaged(), expected + 1, "{}", label);
        }
    }

    #[test]
    fn test_normalized_unit_uses_filter_reference_bin() {
        // |X_k| = |1 + 0.5·e^(-j2πk/N)| falls monotonically from DC to Nyquist
        let mut frame = vec![0.0; 100];
        frame[0] = 1.0;
        frame[1] = 0.5;

        let cases = [
            (FilterConfig::Scaling { gain: 1.0 }, 1),
            (FilterConfig::HighPass1 { cutoff: 100.0 }, 50),
            // (2000 + 3000) / 20000 · 50 = 12.5, rounded up
            (
                FilterConfig::FirBandpass {
                    lower: 2000.0,
                    upper: 3000.0,
                    fir: FirParams::default(),
                },
                13,
            ),
        ];

        for (filter, bin) in cases {
            let board = ScriptedBoard::with_frame(frame.clone());
            let mut config = AcquisitionConfig::default();
            config.analysis.unit = SpectrumUnit::Normalized;
            config.board.filter = filter.clone();
            let (mut acquisition, events) = new_loop(&board, config);

            acquisition.handle_message(LoopMessage::Start);
            assert!(acquisition.tick());

            let report = frames(&events).pop().unwrap();
            let spectrum = &report.slots[0].as_ref().unwrap().spectrum;
            assert!((spectrum[bin] - 1.0).abs() < 1e-12, "{:?}: {}", filter, spectrum[bin]);
            assert!((spectrum[bin - 1] - 1.0).abs() > 1e-6, "{:?}", filter);
        }
    }

    #[test]
    fn test_pause_while_disconnected_resumes_idle() {
        let board = ScriptedBoard::with_frame(vec![0.0; 100]);
        let (mut acquisition, _events) = new_loop(&board, AcquisitionConfig::default());
        acquisition.handle_message(LoopMessage::Start);

        board.set_disconnected(true);
        acquisition.tick();
        acquisition.handle_message(LoopMessage::Pause);
        board.set_disconnected(false);
        acquisition.tick();
        assert_eq!(acquisition.run_state(), RunState::Idle);
    }

    #[test]
    fn test_response_mode_layout() {
        let board = ScriptedBoard::with_frame(vec![0.0; 100]);
        let (mut acquisition, events) = new_loop(&board, AcquisitionConfig::default());

        acquisition.handle_message(LoopMessage::Configure(ConfigChange::Filter(FilterConfig::LowPass1 {
            cutoff: 500.0,
        })));
        board.clear_written();
        acquisition.handle_message(LoopMessage::Configure(ConfigChange::Mode(OperationMode::PulseResponse)));

        assert_eq!(
            board.written(),
            vec![
                "deactivate AD4020",
                "deactivate LTC2500",
                "deactivate Internal ADC",
                "set samplerate 20000.0",
                "set mode Pulse response & signal processing",
            ]
        );

        let config = acquisition.config();
        assert_eq!(config.analysis.slot1.window, "Rectangle");
        assert!(!config.analysis.slot2.is_enabled());
        assert_eq!(config.analysis.unit, SpectrumUnit::Normalized);
        assert_eq!(config.analysis.model, ModelMode::Hz);

        // Impulse response: spectra start above DC and carry the model
        let mut impulse = vec![0.0; 100];
        impulse[0] = 1.0;
        board.set_frame(impulse);
        acquisition.handle_message(LoopMessage::Start);
        assert!(acquisition.tick());

        let report = frames(&events).pop().unwrap();
        let slot = report.slots[0].as_ref().unwrap();
        assert_eq!(slot.frequencies.len(), 50);
        assert!(slot.frequencies[0] > 0.0);
        let model = report.model.unwrap();
        assert_eq!(model.magnitude.len(), 50);
        assert!((model.magnitude[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_model_disabled_in_spectral_mode() {
        let board = ScriptedBoard::default();
        let (mut acquisition, _events) = new_loop(&board, AcquisitionConfig::default());
        acquisition.handle_message(LoopMessage::Configure(ConfigChange::Model(ModelMode::Hz)));
        assert_eq!(acquisition.config().analysis.model, ModelMode::Disabled);
    }

    #[test]
    fn test_band_power_reported() {
        let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
        let mut config = AcquisitionConfig::default();
        config.analysis.power_band = Some(PowerBand::new(0.0, 500.0));
        let (mut acquisition, events) = new_loop(&board, config);

        acquisition.handle_message(LoopMessage::Start);
        assert!(acquisition.tick());
        let power = frames(&events)[0].band_power.unwrap();
        // Unit sine on bin 10: S = 1 and fs / (ENBW · N) = 1
        assert!((power - 1.0).abs() < 1e-6, "power {}", power);

        acquisition.handle_message(LoopMessage::Configure(ConfigChange::PowerBand(Some(PowerBand::new(
            200.0, 500.0,
        )))));
        assert!(acquisition.tick());
        assert!(frames(&events)[0].band_power.unwrap() < 1e-12);
    }

    #[derive(Clone, Default)]
    struct RecordingExporter {
        exported: Arc<Mutex<Vec<(std::path::PathBuf, Vec<NamedSeries>)>>>,
    }

    impl PersistenceSink for RecordingExporter {
        fn export(&mut self, path: &Path, series: &[NamedSeries]) -> Result<(), ExportError> {
            self.exported.lock().unwrap().push((path.to_path_buf(), series.to_vec()));
            Ok(())
        }
    }

    #[test]
    fn test_export_hands_over_series() {
        let board = ScriptedBoard::with_frame(sine(100, 100.0, 1000.0));
        let exporter = RecordingExporter::default();
        let (acquisition, _events) = new_loop(&board, AcquisitionConfig::default());
        let mut acquisition = acquisition.with_exporter(Box::new(exporter.clone()));

        // Nothing to export before the first frame
        acquisition.handle_message(LoopMessage::Export("early".into()));
        assert!(exporter.exported.lock().unwrap().is_empty());

        acquisition.handle_message(LoopMessage::Start);
        acquisition.tick();
        acquisition.handle_message(LoopMessage::Export("spectrum".into()));

        let exported = exporter.exported.lock().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].0, Path::new("spectrum"));
        assert_eq!(exported[0].1[0].name, "Time series");
        assert_eq!(exported[0].1[0].y.len(), 100);
    }

    #[test]
    fn test_handle_and_shutdown() {
        let board = ScriptedBoard::default();
        let (sink, _events) = channel_sink();
        let (mut acquisition, handle) = AcquisitionLoop::new(board, AcquisitionConfig::default(), Box::new(sink));

        assert!(handle.start());
        assert!(handle.configure(ConfigChange::Averaging(true)));
        assert!(handle.shutdown());
        assert!(!acquisition.process_pending());
        assert_eq!(acquisition.run_state(), RunState::Running);
        assert!(acquisition.config().analysis.averaging);
    }
}
