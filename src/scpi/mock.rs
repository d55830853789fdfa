//! Scripted in-memory instrument for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::transport::{Interrupt, Transport, LINE_TERMINATOR};

type Responder = Box<dyn FnMut(&str) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct State {
    incoming: VecDeque<u8>,
    written: Vec<String>,
    reads: usize,
    eof_when_drained: bool,
    interrupted: bool,
    closed: bool,
    responder: Option<Responder>,
}

/// Fake instrument. Replies come from preloaded bytes and/or a responder
/// called for every written line; an empty input buffer reads as a timeout.
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

/// Inspection handle that stays valid after the transport is moved into a client.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_input(bytes: &[u8]) -> Self {
        let transport = Self::new();
        transport.state.lock().incoming.extend(bytes);
        transport
    }

    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Option<Vec<u8>> + Send + 'static,
    {
        let transport = Self::new();
        transport.state.lock().responder = Some(Box::new(responder));
        transport
    }

    /// Report end-of-stream instead of a timeout once the input is exhausted.
    pub fn closing_when_drained(self) -> Self {
        self.state.lock().eof_when_drained = true;
        self
    }

    pub fn handle(&self) -> MockHandle {
        MockHandle {
            state: self.state.clone(),
        }
    }
}

impl MockHandle {
    pub fn written(&self) -> Vec<String> {
        self.state.lock().written.clone()
    }

    pub fn reads(&self) -> usize {
        self.state.lock().reads
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl State {
    fn check_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::new(io::ErrorKind::NotConnected, "mock closed"))
        } else if self.interrupted {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "mock interrupted"))
        } else {
            Ok(())
        }
    }

    fn starved(&mut self) -> io::Error {
        if self.eof_when_drained {
            self.incoming.clear();
            io::Error::new(io::ErrorKind::UnexpectedEof, "mock drained")
        } else {
            io::Error::new(io::ErrorKind::TimedOut, "mock has no reply")
        }
    }
}

impl Transport for MockTransport {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.written.push(line.to_string());
        let reply = state.responder.as_mut().and_then(|respond| respond(line));
        if let Some(reply) = reply {
            state.incoming.extend(reply);
        }
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> io::Result<String> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.reads += 1;
        let Some(end) = state.incoming.iter().position(|&b| b == LINE_TERMINATOR) else {
            return Err(state.starved());
        };
        let mut raw: Vec<u8> = state.incoming.drain(..=end).collect();
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        String::from_utf8(raw).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_exact(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<()> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.reads += 1;
        let wanted = buf.len();
        if state.incoming.len() < wanted {
            return Err(state.starved());
        }
        for (slot, byte) in buf.iter_mut().zip(state.incoming.drain(..wanted)) {
            *slot = byte;
        }
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        Some(Box::new(MockInterrupt(self.state.clone())))
    }
}

struct MockInterrupt(Arc<Mutex<State>>);

impl Interrupt for MockInterrupt {
    fn interrupt(&self) {
        self.0.lock().interrupted = true;
    }
}
