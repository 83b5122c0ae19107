//! Serial link to the acquisition board

pub mod buffer;
pub mod transport;
pub mod stream;
pub mod mock;

pub use buffer::{byte_fifo, ByteConsumer, ByteProducer, ReadError};
pub use transport::{PortError, PortHandle, PortSelector, SerialBackend, SystemSerial};
pub use stream::{ConnectionState, DataCallback, StreamConfig, StreamingPort, DEFAULT_MAX_BUFFER_BYTES};
pub use mock::{MockBackend, Responder};
