use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

use super::lock;

/// Typed notification pushed by the link threads and drained by the
/// application thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    ButtonPress { mode: u8, button: u8 },
    SliderChange { slider: u8, value: u8 },
    ModeChange { mode: u8 },
    /// First handshake frame (READY or Pong) of a connection.
    Ready { info: String },
    ConnectionChanged { connected: bool, port: String },
}

impl DeviceEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            DeviceEvent::ButtonPress { .. } => MessageKind::ButtonPress,
            DeviceEvent::SliderChange { .. } => MessageKind::SliderChange,
            DeviceEvent::ModeChange { .. } => MessageKind::ModeChange,
            DeviceEvent::Ready { .. } => MessageKind::Ready,
            DeviceEvent::ConnectionChanged { .. } => MessageKind::ConnectionChanged,
        }
    }
}

/// Key of the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    ButtonPress,
    SliderChange,
    ModeChange,
    Ready,
    ConnectionChanged,
}

impl MessageKind {
    pub const ALL: [MessageKind; 5] = [
        MessageKind::ButtonPress,
        MessageKind::SliderChange,
        MessageKind::ModeChange,
        MessageKind::Ready,
        MessageKind::ConnectionChanged,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            MessageKind::ButtonPress => "BTN_PRESS",
            MessageKind::SliderChange => "SLIDER_CHANGE",
            MessageKind::ModeChange => "MODE_CHANGE",
            MessageKind::Ready => "READY",
            MessageKind::ConnectionChanged => "CONNECTION_CHANGED",
        }
    }
}

/// Counters kept per connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMetrics {
    pub frames_received: u64,
    pub malformed_frames: u64,
    pub repeated_handshakes: u64,
    pub io_errors: u64,
    pub keepalives_sent: u64,
    pub buffer_trims: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct HandshakeFlags {
    received: bool,
    handled: bool,
}

/// State of one connection shared between the reader thread and the
/// application thread. Created fresh on every connect.
#[derive(Debug)]
pub struct LinkState {
    handshake: Mutex<HandshakeFlags>,
    ready: Condvar,
    last_message: Mutex<Option<Instant>>,
    syncing: AtomicBool,
    metrics: Mutex<LinkMetrics>,
}

impl LinkState {
    pub fn new() -> Self {
        Self {
            handshake: Mutex::new(HandshakeFlags::default()),
            ready: Condvar::new(),
            last_message: Mutex::new(Some(Instant::now())),
            syncing: AtomicBool::new(false),
            metrics: Mutex::new(LinkMetrics::default()),
        }
    }

    /// Mark the handshake as received and wake any waiter. Returns true only
    /// for the first call.
    pub fn complete_handshake(&self) -> bool {
        let mut flags = lock(&self.handshake);
        if flags.received {
            return false;
        }
        flags.received = true;
        self.ready.notify_all();
        true
    }

    pub fn handshake_received(&self) -> bool {
        lock(&self.handshake).received
    }

    /// Block until the handshake arrives or `timeout` elapses.
    pub fn wait_for_handshake(&self, timeout: Duration) -> bool {
        let flags = lock(&self.handshake);
        let (flags, _) = self
            .ready
            .wait_timeout_while(flags, timeout, |flags| !flags.received)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        flags.received
    }

    /// Claim the right to act on the handshake (run the initial sync).
    /// Succeeds once per connection, and only after the handshake arrived.
    pub fn claim_handshake(&self) -> bool {
        let mut flags = lock(&self.handshake);
        if flags.received && !flags.handled {
            flags.handled = true;
            true
        } else {
            false
        }
    }

    /// Heartbeat: a frame just arrived.
    pub fn touch(&self) {
        *lock(&self.last_message) = Some(Instant::now());
    }

    pub fn last_message_age(&self) -> Option<Duration> {
        lock(&self.last_message).map(|at| at.elapsed())
    }

    pub fn set_syncing(&self, syncing: bool) {
        self.syncing.store(syncing, Ordering::SeqCst);
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> LinkMetrics {
        lock(&self.metrics).clone()
    }

    pub fn record(&self, update: impl FnOnce(&mut LinkMetrics)) {
        update(&mut lock(&self.metrics));
    }
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}
