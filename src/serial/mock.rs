//! Scripted in-memory port for driving the link without hardware.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::interface::{PortProvider, SerialPortIO};
use super::link::lock;
use super::{Result, SerialError, SerialPortInfo};

#[derive(Debug)]
enum ReadStep {
    Bytes(Vec<u8>),
    Error(std::io::ErrorKind),
}

#[derive(Debug)]
struct MockState {
    incoming: VecDeque<ReadStep>,
    written: Vec<u8>,
    open: bool,
    fail_writes: bool,
}

/// A port whose incoming data is scripted and whose outgoing data is
/// recorded. Clones share the same state, so a test keeps one clone while
/// the link owns another.
#[derive(Debug, Clone)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                incoming: VecDeque::new(),
                written: Vec::new(),
                open: true,
                fail_writes: false,
            })),
        }
    }

    /// Queue one frame, newline added.
    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{}\n", line).as_bytes());
    }

    pub fn push_bytes(&self, bytes: &[u8]) {
        lock(&self.state).incoming.push_back(ReadStep::Bytes(bytes.to_vec()));
    }

    /// Queue a read failure.
    pub fn push_error(&self, kind: std::io::ErrorKind) {
        lock(&self.state).incoming.push_back(ReadStep::Error(kind));
    }

    /// Everything the host wrote, split into frames.
    pub fn written_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&lock(&self.state).written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Frames written, ignoring keepalive PINGs.
    pub fn written_commands(&self) -> Vec<String> {
        self.written_lines().into_iter().filter(|l| l != "PING").collect()
    }

    pub fn clear_written(&self) {
        lock(&self.state).written.clear();
    }

    pub fn set_fail_writes(&self, fail: bool) {
        lock(&self.state).fail_writes = fail;
    }

    /// Simulate the device going away: the handle reports itself closed.
    pub fn unplug(&self) {
        lock(&self.state).open = false;
    }

    fn reopen(&self) {
        lock(&self.state).open = true;
    }
}

impl Default for MockPort {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialPortIO for MockPort {
    fn send_data(&mut self, data: &[u8]) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(SerialError::PortClosed);
        }
        if state.fail_writes {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted write failure",
            )));
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn read_available(&mut self) -> Result<Vec<u8>> {
        let mut state = lock(&self.state);
        if !state.open {
            return Err(SerialError::PortClosed);
        }
        match state.incoming.pop_front() {
            Some(ReadStep::Bytes(bytes)) => Ok(bytes),
            Some(ReadStep::Error(kind)) => Err(SerialError::IoError(std::io::Error::new(
                kind,
                "scripted read failure",
            ))),
            None => Ok(Vec::new()),
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    fn close(&mut self) {
        lock(&self.state).open = false;
    }
}

/// A set of named mock ports that can appear and disappear.
#[derive(Debug, Default)]
pub struct MockPortProvider {
    ports: Mutex<HashMap<String, MockPort>>,
    present: Mutex<Vec<String>>,
    open_attempts: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MockPortProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `port_name` present and return the port the next open will use.
    pub fn plug(&self, port_name: &str) -> MockPort {
        let port = MockPort::new();
        lock(&self.ports).insert(port_name.to_string(), port.clone());
        let mut present = lock(&self.present);
        if !present.iter().any(|p| p == port_name) {
            present.push(port_name.to_string());
        }
        port
    }

    /// Remove `port_name` from enumeration and close its handle.
    pub fn unplug(&self, port_name: &str) {
        lock(&self.present).retain(|p| p != port_name);
        if let Some(port) = lock(&self.ports).remove(port_name) {
            port.unplug();
        }
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

impl PortProvider for MockPortProvider {
    fn list_ports(&self) -> Result<Vec<SerialPortInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.present)
            .iter()
            .map(|name| SerialPortInfo::new(name.clone(), format!("Mock Serial Port ({})", name)))
            .collect())
    }

    fn open(&self, port_name: &str, _baud_rate: u32) -> Result<Box<dyn SerialPortIO>> {
        self.open_attempts.fetch_add(1, Ordering::SeqCst);
        let present = lock(&self.present).iter().any(|p| p == port_name);
        match lock(&self.ports).get(port_name) {
            Some(port) if present => {
                port.reopen();
                Ok(Box::new(port.clone()))
            }
            _ => Err(SerialError::PortNotFound(port_name.to_string())),
        }
    }
}
