//! In-memory transport
//!
//! Stands in for the acquisition board in tests and dry runs: it records every
//! byte written, hands queued chunks to the reader, can answer commands through
//! a responder and can be unplugged and replugged on demand.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::transport::{PortError, PortHandle, SerialBackend};

/// Produces the board's reply to one written line
pub type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

struct MockState {
    ports: Vec<String>,
    plugged: bool,
    generation: u64,
    incoming: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    pending_line: Vec<u8>,
    responder: Option<Responder>,
    open_count: usize,
}

/// Shared handle to the simulated board; clones control the same board
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    read_timeout: Duration,
}

impl MockBackend {
    /// Board reachable under any of `ports`
    pub fn new<S: Into<String>>(ports: impl IntoIterator<Item = S>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                ports: ports.into_iter().map(Into::into).collect(),
                plugged: true,
                generation: 0,
                incoming: VecDeque::new(),
                written: Vec::new(),
                pending_line: Vec::new(),
                responder: None,
                open_count: 0,
            })),
            read_timeout: Duration::from_millis(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the board from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes for the reader
    pub fn push_incoming(&self, bytes: &[u8]) {
        self.lock().incoming.push_back(bytes.to_vec());
    }

    /// Answer written lines; returned bytes are queued for the reader
    pub fn set_responder(&self, responder: Responder) {
        self.lock().responder = Some(responder);
    }

    /// Unplug the board: open handles fail and nothing enumerates
    pub fn unplug(&self) {
        let mut state = self.lock();
        state.plugged = false;
        state.generation += 1;
        state.incoming.clear();
    }

    /// Plug the board back in
    pub fn plug(&self) {
        self.lock().plugged = true;
    }

    pub fn is_plugged(&self) -> bool {
        self.lock().plugged
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    /// Written bytes split into lines (trailing newline removed)
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.lock().written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn clear_written(&self) {
        self.lock().written.clear();
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.lock().open_count
    }
}

impl SerialBackend for MockBackend {
    fn enumerate(&self) -> Result<Vec<String>, PortError> {
        let state = self.lock();
        if state.plugged {
            Ok(state.ports.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn open(&self, name: &str) -> Result<Box<dyn PortHandle>, PortError> {
        let mut state = self.lock();
        if !state.plugged || !state.ports.iter().any(|p| p == name) {
            return Err(PortError::Unavailable(name.to_string()));
        }
        state.open_count += 1;
        Ok(Box::new(MockHandle {
            name: name.to_string(),
            generation: state.generation,
            backend: self.clone(),
        }))
    }
}

struct MockHandle {
    name: String,
    generation: u64,
    backend: MockBackend,
}

impl MockHandle {
    fn check(&self, state: &MockState) -> Result<(), PortError> {
        if state.plugged && state.generation == self.generation {
            Ok(())
        } else {
            Err(PortError::Io(format!("{} unplugged", self.name)))
        }
    }
}

impl PortHandle for MockHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        {
            let mut state = self.backend.lock();
            self.check(&state)?;

            if let Some(mut chunk) = state.incoming.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    chunk.drain(..n);
                    state.incoming.push_front(chunk);
                }
                return Ok(n);
            }
        }

        // Behave like a serial read timeout
        thread::sleep(self.backend.read_timeout);
        Ok(0)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PortError> {
        let mut state = self.backend.lock();
        self.check(&state)?;
        state.written.extend_from_slice(bytes);

        // Feed complete lines to the responder
        state.pending_line.extend_from_slice(bytes);
        while let Some(pos) = state.pending_line.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = state.pending_line.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..pos]).into_owned();
            let reply = state.responder.as_mut().and_then(|respond| respond(&text));
            if let Some(reply) = reply {
                state.incoming.push_back(reply);
            }
        }
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn PortHandle>, PortError> {
        Ok(Box::new(MockHandle {
            name: self.name.clone(),
            generation: self.generation,
            backend: self.backend.clone(),
        }))
    }
}
