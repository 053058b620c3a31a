//! Frame reader thread: polls the transport, reassembles newline-delimited
//! frames and hands them to the dispatcher. Also emits the keepalive PING.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::serial::{protocol, SerialError, SerialInterface};
use super::dispatch::LineDispatcher;
use super::{join_bounded, lock};

/// A partial line longer than this without a newline is trimmed.
pub const MAX_PARTIAL_LINE: usize = 8192;
const TRIM_TO: usize = 4096;

/// Accumulates raw bytes and splits them into text frames.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    trims: u64,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every complete frame, trimmed, skipping
    /// empty lines. Invalid UTF-8 is dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = decode_permissive(&raw[..raw.len() - 1]);
            let frame = text.trim();
            if !frame.is_empty() {
                frames.push(frame.to_string());
            }
        }

        if self.buffer.len() > MAX_PARTIAL_LINE {
            let excess = self.buffer.len() - TRIM_TO;
            self.buffer.drain(..excess);
            self.trims += 1;
        }
        frames
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn trims(&self) -> u64 {
        self.trims
    }
}

fn decode_permissive(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Counts consecutive I/O failures against a threshold.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    consecutive: u32,
    threshold: u32,
}

impl ErrorTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a failure; true once the threshold is reached.
    pub fn record_error(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive >= self.threshold
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The transport reports its handle closed.
    PortClosed,
    /// The consecutive error threshold was reached.
    TooManyErrors,
}

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub poll_interval: Duration,
    pub error_threshold: u32,
    pub error_backoff: Duration,
    /// `None` disables the keepalive PING.
    pub keepalive: Option<Duration>,
}

/// Control handle for a running reader thread.
pub struct ReaderHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ReaderHandle {
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Ask the thread to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Ask the thread to stop and wait at most `bound` for it.
    pub fn stop(mut self, bound: Duration) -> bool {
        self.signal_stop();
        match self.thread.take() {
            Some(thread) => join_bounded(thread, bound, "Serial reader"),
            None => true,
        }
    }
}

struct ReaderContext {
    transport: Arc<Mutex<SerialInterface>>,
    dispatcher: LineDispatcher,
    config: ReaderConfig,
    running: Arc<AtomicBool>,
    on_disconnect: Box<dyn Fn(DisconnectReason) + Send>,
}

/// Start the reader thread for one connection. `on_disconnect` is invoked
/// from the reader thread, at most once, right before it exits on a fatal
/// condition; it is not invoked on a cooperative stop.
pub fn spawn_reader(
    transport: Arc<Mutex<SerialInterface>>,
    dispatcher: LineDispatcher,
    config: ReaderConfig,
    on_disconnect: Box<dyn Fn(DisconnectReason) + Send>,
) -> Result<ReaderHandle, SerialError> {
    let running = Arc::new(AtomicBool::new(true));
    let port_name = lock(&transport).port_name().to_string();

    let ctx = ReaderContext {
        transport,
        dispatcher,
        config,
        running: running.clone(),
        on_disconnect,
    };

    let thread = std::thread::Builder::new()
        .name(format!("serial-reader-{}", port_name))
        .spawn(move || reader_thread(ctx))?;

    Ok(ReaderHandle {
        running,
        thread: Some(thread),
    })
}

enum Poll {
    Data(Vec<u8>),
    Closed,
    Failed(SerialError),
}

fn reader_thread(ctx: ReaderContext) {
    let port_name = lock(&ctx.transport).port_name().to_string();
    let link = ctx.dispatcher.link().clone();
    let mut frames = FrameAssembler::new();
    let mut errors = ErrorTracker::new(ctx.config.error_threshold);
    let mut last_keepalive = Instant::now();

    log::debug!("Read loop started for {}", port_name);

    while ctx.running.load(Ordering::SeqCst) {
        let mut failure = None;

        if let Some(interval) = ctx.config.keepalive {
            if last_keepalive.elapsed() >= interval {
                last_keepalive = Instant::now();
                match lock(&ctx.transport).write_line(&protocol::ping()) {
                    Ok(()) => link.record(|m| m.keepalives_sent += 1),
                    Err(e) => failure = Some(e),
                }
            }
        }

        let poll = match failure {
            Some(e) => Poll::Failed(e),
            None => {
                let mut transport = lock(&ctx.transport);
                if !transport.is_open() {
                    Poll::Closed
                } else {
                    match transport.read_available() {
                        Ok(bytes) => Poll::Data(bytes),
                        Err(e) => Poll::Failed(e),
                    }
                }
            }
        };

        match poll {
            Poll::Data(bytes) => {
                // An empty read leaves earlier failures counted.
                if !bytes.is_empty() {
                    errors.record_success();
                    let trims_before = frames.trims();
                    for frame in frames.push(&bytes) {
                        if !ctx.running.load(Ordering::SeqCst) {
                            break;
                        }
                        ctx.dispatcher.handle_line(&frame);
                    }
                    if frames.trims() != trims_before {
                        log::warn!("Partial frame exceeded {} bytes, trimmed", MAX_PARTIAL_LINE);
                        link.record(|m| m.buffer_trims += 1);
                    }
                }
            }
            Poll::Closed => {
                if ctx.running.load(Ordering::SeqCst) {
                    log::error!("Port {} is no longer open", port_name);
                    (ctx.on_disconnect)(DisconnectReason::PortClosed);
                }
                break;
            }
            Poll::Failed(e) => {
                let tripped = errors.record_error();
                log::warn!(
                    "Serial error on {} ({}/{}): {}",
                    port_name,
                    errors.consecutive(),
                    errors.threshold(),
                    e
                );
                link.record(|m| {
                    m.io_errors += 1;
                    m.last_error = Some(e.to_string());
                });

                if tripped {
                    if ctx.running.load(Ordering::SeqCst) {
                        log::error!("Too many errors on {}, device disconnected", port_name);
                        (ctx.on_disconnect)(DisconnectReason::TooManyErrors);
                    }
                    break;
                }
                std::thread::sleep(ctx.config.error_backoff);
                continue;
            }
        }

        std::thread::sleep(ctx.config.poll_interval);
    }

    log::debug!("Read loop stopped for {}", port_name);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reassembles_frames_across_reads() {
        let mut frames = FrameAssembler::new();
        assert!(frames.push(b"BTN_PR").is_empty());
        assert_eq!(frames.push(b"ESS:0:1\r\nMODE_CH"), vec!["BTN_PRESS:0:1"]);
        assert_eq!(frames.pending(), 7);
        assert_eq!(frames.push(b"ANGE:2\n\n  \nPong\n"), vec!["MODE_CHANGE:2", "Pong"]);
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn drops_invalid_utf8_but_keeps_split_characters() {
        let mut frames = FrameAssembler::new();
        assert_eq!(frames.push(b"REA\xffDY\n"), vec!["READY"]);

        let text = "MODE_NAME:0:Caf\u{e9}\n".as_bytes();
        let (head, tail) = text.split_at(text.len() - 2);
        assert!(frames.push(head).is_empty());
        assert_eq!(frames.push(tail), vec!["MODE_NAME:0:Caf\u{e9}"]);
    }

    #[test]
    fn trims_runaway_partial_line() {
        let mut frames = FrameAssembler::new();
        frames.push(&vec![b'x'; MAX_PARTIAL_LINE + 1]);
        assert_eq!(frames.trims(), 1);
        assert_eq!(frames.pending(), TRIM_TO);
    }

    #[test]
    fn error_tracker_trips_on_threshold_and_resets() {
        let mut errors = ErrorTracker::new(5);
        for _ in 0..4 {
            assert!(!errors.record_error());
        }
        errors.record_success();
        assert_eq!(errors.consecutive(), 0);
        for _ in 0..4 {
            assert!(!errors.record_error());
        }
        assert!(errors.record_error());
    }
}
