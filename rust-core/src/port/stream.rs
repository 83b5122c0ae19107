//! Auto-reconnecting streaming port
//!
//! One background thread owns the physical read handle and the write end of
//! the byte FIFO. I/O failures never reach the caller: the thread marks the
//! port disconnected and keeps reopening it on a fixed interval until the
//! board comes back.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::buffer::{byte_fifo, ByteConsumer, ByteProducer, ReadError};
use super::transport::{PortError, PortHandle, PortSelector, SerialBackend};

/// Default FIFO size: 100 frames of 32768 four-byte samples
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 32768 * 4 * 100;

/// Bytes requested from the transport per read
const READ_CHUNK: usize = 4096;

/// Called from the reader thread with the size of every received chunk
pub type DataCallback = Box<dyn FnMut(usize) + Send>;

/// Connection state of a streaming port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Connected => 0,
            ConnectionState::Disconnected => 1,
            ConnectionState::Reconnecting => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connected,
            1 => ConnectionState::Disconnected,
            _ => ConnectionState::Reconnecting,
        }
    }
}

/// Streaming port settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub selector: PortSelector,
    pub max_buffer_bytes: usize,
    pub reconnect_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            selector: PortSelector::Auto { index: 1 },
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            reconnect_interval: Duration::from_millis(1),
        }
    }
}

/// State shared between the port and its reader thread
struct Shared {
    state: AtomicU8,
    running: AtomicBool,
    reconnect_requested: AtomicBool,
    /// Successful reopens since `open`
    reconnects: AtomicU64,
    writer: Mutex<Option<Box<dyn PortHandle>>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.to_u8(), Ordering::SeqCst);
    }

    fn writer(&self) -> MutexGuard<'_, Option<Box<dyn PortHandle>>> {
        self.writer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drop the write handle and flag the port as disconnected
    fn mark_disconnected(&self) {
        *self.writer() = None;
        self.set_state(ConnectionState::Disconnected);
    }
}

/// Buffered, line- and byte-oriented channel to the acquisition board
pub struct StreamingPort {
    backend: Arc<dyn SerialBackend>,
    config: StreamConfig,
    shared: Arc<Shared>,
    /// Read handle waiting for `start`
    pending_reader: Option<Box<dyn PortHandle>>,
    consumer: Option<ByteConsumer>,
    reader: Option<JoinHandle<()>>,
}

impl StreamingPort {
    /// Open the selected port
    ///
    /// Writes work immediately; reads return no data until [`start`](Self::start).
    pub fn open(backend: Arc<dyn SerialBackend>, config: StreamConfig) -> Result<Self, PortError> {
        let handle = backend.open_selected(&config.selector).map_err(|e| {
            log::error!("{}", e);
            e
        })?;
        let writer = handle.try_clone()?;
        log::info!("Opened serial port {}", handle.name());

        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Connected.to_u8()),
            running: AtomicBool::new(false),
            reconnect_requested: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            writer: Mutex::new(Some(writer)),
        });

        Ok(Self {
            backend,
            config,
            shared,
            pending_reader: Some(handle),
            consumer: None,
            reader: None,
        })
    }

    /// Start the background reader
    ///
    /// # Arguments
    /// * `on_data` - Called with the size of every chunk appended to the buffer
    pub fn start(&mut self, on_data: Option<DataCallback>) -> Result<(), PortError> {
        if self.reader.is_some() {
            return Ok(());
        }

        let (producer, consumer) = byte_fifo(self.config.max_buffer_bytes);
        self.consumer = Some(consumer);

        // A handle lost before start is replaced by the reconnect logic
        let handle = self.pending_reader.take();
        if handle.is_none() {
            self.shared.mark_disconnected();
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let worker = Reader {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            selector: self.config.selector.clone(),
            reconnect_interval: self.config.reconnect_interval,
            producer,
            on_data,
        };

        let join = thread::Builder::new()
            .name("dsmv-serial-reader".to_string())
            .spawn(move || worker.run(handle))
            .map_err(|e| PortError::Io(e.to_string()))?;
        self.reader = Some(join);
        Ok(())
    }

    /// Remove and return the first `n` buffered bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        match self.consumer.as_mut() {
            Some(consumer) => consumer.read_bytes(n),
            None => Err(ReadError::NotEnoughData),
        }
    }

    /// Remove and return the first buffered line, without its newline
    pub fn read_line(&mut self) -> Result<String, ReadError> {
        match self.consumer.as_mut() {
            Some(consumer) => consumer.read_line(),
            None => Err(ReadError::NotEnoughData),
        }
    }

    /// Discard buffered bytes, optionally keeping a trailing partial line
    pub fn clear_buffer(&mut self, keep_partial_line: bool) {
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.clear(keep_partial_line);
        }
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.consumer.as_ref().map_or(0, |c| c.len())
    }

    /// Write `line` followed by a newline
    ///
    /// A failed write disconnects the port and starts reconnecting.
    pub fn write_line(&self, line: &str) -> Result<(), PortError> {
        if self.disconnected() {
            log::debug!("Dropping '{}': the port is closed", line);
            return Err(PortError::Closed);
        }

        let mut writer = self.shared.writer();
        let handle = writer.as_mut().ok_or(PortError::Closed)?;

        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        match handle.write_bytes(&bytes) {
            Ok(()) => {
                log::trace!("-> {}", line);
                Ok(())
            }
            Err(e) => {
                log::warn!("Error in writing to {}: {}", handle.name(), e);
                *writer = None;
                drop(writer);
                self.shared.set_state(ConnectionState::Disconnected);
                self.shared.reconnect_requested.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Number of successful reconnects since the port was opened
    ///
    /// Lets a consumer notice a drop and reopen that happened entirely
    /// between two of its polls of [`state`](Self::state).
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnects.load(Ordering::SeqCst)
    }

    /// True unless the port is connected
    pub fn disconnected(&self) -> bool {
        self.state() != ConnectionState::Connected
    }

    /// Stop the reader thread and close the port
    pub fn close(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.reader.take() {
            if join.join().is_err() {
                log::error!("Serial reader thread panicked");
            }
        }
        self.shared.mark_disconnected();
        self.pending_reader = None;
    }
}

impl Drop for StreamingPort {
    fn drop(&mut self) {
        self.close();
    }
}

/// Background reader: owns the read handle and the FIFO producer
struct Reader {
    backend: Arc<dyn SerialBackend>,
    shared: Arc<Shared>,
    selector: PortSelector,
    reconnect_interval: Duration,
    producer: ByteProducer,
    on_data: Option<DataCallback>,
}

impl Reader {
    fn run(mut self, mut handle: Option<Box<dyn PortHandle>>) {
        let mut buf = vec![0u8; READ_CHUNK];

        while self.shared.running.load(Ordering::SeqCst) {
            if self.shared.reconnect_requested.swap(false, Ordering::SeqCst) && handle.is_some() {
                log::warn!("Serial port disconnected. Trying to reconnect...");
                handle = None;
                self.shared.mark_disconnected();
            }

            match handle.as_mut() {
                Some(port) => match port.read_available(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => self.store(&buf[..n]),
                    Err(e) => {
                        log::warn!("Serial port disconnected ({}). Trying to reconnect...", e);
                        handle = None;
                        self.shared.mark_disconnected();
                    }
                },
                None => handle = self.reopen(),
            }
        }
        log::debug!("Serial reader stopped");
    }

    /// Append a received chunk; chunks that do not fit are dropped whole
    fn store(&mut self, chunk: &[u8]) {
        if !self.producer.push_chunk(chunk) {
            log::warn!(
                "Receive buffer full: dropped {} bytes ({} free of {})",
                chunk.len(),
                self.producer.free_len(),
                self.producer.capacity()
            );
            return;
        }
        if let Some(callback) = self.on_data.as_mut() {
            callback(chunk.len());
        }
    }

    /// One reconnect attempt after the retry interval
    fn reopen(&mut self) -> Option<Box<dyn PortHandle>> {
        thread::sleep(self.reconnect_interval);
        self.shared.set_state(ConnectionState::Reconnecting);

        let handle = match self.backend.open_selected(&self.selector) {
            Ok(handle) => handle,
            Err(e) => {
                log::debug!("Reconnect attempt failed: {}", e);
                return None;
            }
        };
        let writer = match handle.try_clone() {
            Ok(writer) => writer,
            Err(e) => {
                log::debug!("Reconnect attempt failed: {}", e);
                return None;
            }
        };

        *self.shared.writer() = Some(writer);
        self.shared.reconnect_requested.store(false, Ordering::SeqCst);
        // Counted before the state flips so a consumer never sees Connected with a stale count
        self.shared.reconnects.fetch_add(1, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connected);
        log::info!("Reconnected to serial port {}", handle.name());
        Some(handle)
    }
}
