//! Physical transport primitives
//!
//! The streaming port only needs to enumerate, open, read, write and close
//! ports. These are traits so the reader thread can run against a real serial
//! device or an in-memory transport.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PortError {
    #[error("Could not open serial port {0}. Try un- and replugging the device or providing the correct port name")]
    Unavailable(String),

    #[error("Automatic port selection needs more than {index} ports, found {found}")]
    NoAutoPort { index: usize, found: usize },

    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(String),

    #[error("Serial I/O failed: {0}")]
    Io(String),

    #[error("The port is closed")]
    Closed,
}

/// Which port to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    /// Open this port name
    Named(String),
    /// Open the enumerated port at `index`
    Auto { index: usize },
}

impl PortSelector {
    /// "Auto" selects by index, anything else is a port name
    pub fn parse(name: &str, auto_index: usize) -> Self {
        if name.eq_ignore_ascii_case("auto") {
            PortSelector::Auto { index: auto_index }
        } else {
            PortSelector::Named(name.to_string())
        }
    }
}

/// An open port
pub trait PortHandle: Send {
    /// Port name this handle was opened with
    fn name(&self) -> &str;

    /// Read whatever is available into `buf`
    ///
    /// # Returns
    /// Number of bytes read; `Ok(0)` when nothing arrived before the read timeout
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;

    /// Write all bytes
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PortError>;

    /// Second handle to the same port, used for writing while the reader blocks
    fn try_clone(&self) -> Result<Box<dyn PortHandle>, PortError>;
}

/// Enumerates and opens ports
pub trait SerialBackend: Send + Sync {
    /// Names of the currently available ports
    fn enumerate(&self) -> Result<Vec<String>, PortError>;

    /// Open a port by name
    fn open(&self, name: &str) -> Result<Box<dyn PortHandle>, PortError>;

    /// Resolve a selector to a port name and open it
    fn open_selected(&self, selector: &PortSelector) -> Result<Box<dyn PortHandle>, PortError> {
        let name = match selector {
            PortSelector::Named(name) => name.clone(),
            PortSelector::Auto { index } => {
                let ports = self.enumerate()?;
                let name = ports.get(*index).cloned().ok_or(PortError::NoAutoPort {
                    index: *index,
                    found: ports.len(),
                })?;
                log::debug!("Auto port selection: index {} of {:?} -> {}", index, ports, name);
                name
            }
        };
        self.open(&name)
    }
}

/// Serial ports via the `serialport` crate
#[derive(Debug, Clone)]
pub struct SystemSerial {
    baud_rate: u32,
    read_timeout: Duration,
}

impl SystemSerial {
    /// # Arguments
    /// * `baud_rate` - Line rate; USB CDC boards ignore it
    /// * `read_timeout` - How long a read waits before reporting no data
    pub fn new(baud_rate: u32, read_timeout: Duration) -> Self {
        Self { baud_rate, read_timeout }
    }
}

impl Default for SystemSerial {
    fn default() -> Self {
        Self::new(9600, Duration::from_millis(10))
    }
}

impl SerialBackend for SystemSerial {
    fn enumerate(&self) -> Result<Vec<String>, PortError> {
        let ports = serialport::available_ports().map_err(|e| PortError::Enumerate(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, name: &str) -> Result<Box<dyn PortHandle>, PortError> {
        let port = serialport::new(name, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| {
                log::debug!("Opening {} failed: {}", name, e);
                PortError::Unavailable(name.to_string())
            })?;

        Ok(Box::new(SystemPort {
            name: name.to_string(),
            port,
        }))
    }
}

struct SystemPort {
    name: String,
    port: Box<dyn serialport::SerialPort>,
}

impl PortHandle for SystemPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        match self.port.read(buf) {
            Ok(0) => Err(PortError::Io("end of stream".to_string())),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(PortError::Io(e.to_string())),
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| PortError::Io(e.to_string()))
    }

    fn try_clone(&self) -> Result<Box<dyn PortHandle>, PortError> {
        let port = self.port.try_clone().map_err(|e| PortError::Io(e.to_string()))?;
        Ok(Box::new(SystemPort {
            name: self.name.clone(),
            port,
        }))
    }
}
