//! Bounded byte FIFO between the serial reader thread and the acquisition loop
//!
//! The producer side only ever accepts whole chunks: a chunk that does not fit
//! is dropped entirely, so the consumer never sees a partial frame.

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("Not enough data")]
    NotEnoughData,

    #[error("Read data isn't a string")]
    InvalidText,
}

/// Create a byte FIFO holding at most `capacity` bytes
///
/// # Returns
/// Producer end (for the reader thread) and consumer end (for the loop)
pub fn byte_fifo(capacity: usize) -> (ByteProducer, ByteConsumer) {
    let capacity = capacity.max(1);
    let (producer, consumer) = HeapRb::<u8>::new(capacity).split();
    (
        ByteProducer { producer, capacity },
        ByteConsumer { consumer, capacity },
    )
}

/// Write end of the FIFO
pub struct ByteProducer {
    producer: HeapProducer<u8>,
    capacity: usize,
}

impl ByteProducer {
    /// Append a whole chunk
    ///
    /// # Returns
    /// `false` if the chunk did not fit and was discarded
    pub fn push_chunk(&mut self, chunk: &[u8]) -> bool {
        if self.producer.free_len() < chunk.len() {
            return false;
        }
        self.producer.push_slice(chunk);
        true
    }

    /// Get number of free bytes
    pub fn free_len(&self) -> usize {
        self.producer.free_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Read end of the FIFO
pub struct ByteConsumer {
    consumer: HeapConsumer<u8>,
    capacity: usize,
}

impl ByteConsumer {
    /// Remove and return the first `n` bytes if that many are buffered
    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>, ReadError> {
        if self.consumer.len() < n {
            return Err(ReadError::NotEnoughData);
        }
        let mut out = vec![0; n];
        self.consumer.pop_slice(&mut out);
        Ok(out)
    }

    /// Remove and return the first line, without its newline
    ///
    /// A line that is not valid UTF-8 is still consumed.
    pub fn read_line(&mut self) -> Result<String, ReadError> {
        let newline = self
            .consumer
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(ReadError::NotEnoughData)?;

        let mut line = vec![0; newline + 1];
        self.consumer.pop_slice(&mut line);
        line.pop();

        String::from_utf8(line).map_err(|_| ReadError::InvalidText)
    }

    /// Discard buffered bytes
    ///
    /// # Arguments
    /// * `keep_partial_line` - Only discard up to and including the last
    ///   newline, keeping a trailing incomplete line
    pub fn clear(&mut self, keep_partial_line: bool) {
        if !keep_partial_line {
            self.consumer.clear();
            return;
        }

        let last_newline = self
            .consumer
            .iter()
            .enumerate()
            .filter(|&(_, &b)| b == b'\n')
            .map(|(i, _)| i)
            .last();
        if let Some(index) = last_newline {
            self.consumer.skip(index + 1);
        }
    }

    /// Copy of the buffered bytes, oldest first
    pub fn peek_all(&self) -> Vec<u8> {
        self.consumer.iter().copied().collect()
    }

    /// Get number of buffered bytes
    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
