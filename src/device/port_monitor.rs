//! Auto-reconnect loop: while disconnected, watch port enumeration for the
//! preferred port and reconnect to it when it shows up.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::serial::link::join_bounded;
use crate::serial::{SerialError, SerialPortInfo};

/// Upper bound on a single sleep, so a stop request is seen promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(25);

/// What the loop drives. Implemented by the device manager.
pub trait ReconnectTarget: Send + Sync {
    fn is_connected(&self) -> bool;

    fn preferred_port(&self) -> Option<String>;

    fn available_ports(&self) -> Result<Vec<SerialPortInfo>, SerialError>;

    /// Attempt a connection; true on success.
    fn try_connect(&self, port_name: &str) -> bool;
}

/// Handle to a running reconnect thread.
pub struct AutoReconnect {
    running: Arc<AtomicBool>,
    attempts: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl AutoReconnect {
    pub fn start(interval: Duration, target: Arc<dyn ReconnectTarget>) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let attempts = Arc::new(AtomicU64::new(0));

        let thread = {
            let running = running.clone();
            let attempts = attempts.clone();
            std::thread::Builder::new()
                .name("auto-reconnect".to_string())
                .spawn(move || reconnect_loop(&*target, interval, &running, &attempts))?
        };

        Ok(Self {
            running,
            attempts,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.thread.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Cooperative stop; waits at most `bound` for the thread.
    pub fn stop(mut self, bound: Duration) -> bool {
        self.running.store(false, Ordering::SeqCst);
        let stopped = match self.thread.take() {
            Some(thread) => join_bounded(thread, bound, "Auto-reconnect"),
            None => true,
        };
        log::info!("Auto-reconnect stopped");
        stopped
    }
}

impl Drop for AutoReconnect {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn reconnect_loop(
    target: &dyn ReconnectTarget,
    interval: Duration,
    running: &AtomicBool,
    attempts: &AtomicU64,
) {
    log::info!(
        "Reconnect loop started for {}",
        target.preferred_port().unwrap_or_else(|| "<no port>".to_string())
    );

    while running.load(Ordering::SeqCst) {
        let attempt = catch_unwind(AssertUnwindSafe(|| {
            reconnect_once(target, running, attempts)
        }));
        match attempt {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Reconnect error: {}", e),
            Err(_) => log::error!("Reconnect attempt panicked"),
        }

        sleep_while_running(interval, running);
    }

    log::info!("Reconnect loop stopped");
}

fn reconnect_once(
    target: &dyn ReconnectTarget,
    running: &AtomicBool,
    attempts: &AtomicU64,
) -> Result<(), SerialError> {
    if target.is_connected() {
        return Ok(());
    }
    let Some(port) = target.preferred_port() else {
        return Ok(());
    };

    let available = target.available_ports()?;
    if !available.iter().any(|p| p.port_name == port) {
        log::debug!("{} not present, waiting", port);
        return Ok(());
    }

    // Stop may have been requested while enumerating.
    if !running.load(Ordering::SeqCst) {
        return Ok(());
    }

    log::info!("Attempting to connect to {}...", port);
    attempts.fetch_add(1, Ordering::SeqCst);
    if target.try_connect(&port) {
        log::info!("Auto-reconnect successful");
    } else {
        log::warn!("Connect attempt to {} failed", port);
    }
    Ok(())
}

fn sleep_while_running(total: Duration, running: &AtomicBool) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}
