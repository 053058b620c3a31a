//! The live side of a connection: the reader thread that reassembles frames,
//! the dispatcher that routes them, and the state both share with the
//! application thread.

pub mod dispatch;
pub mod reader;
pub mod types;

pub use dispatch::LineDispatcher;
pub use reader::{spawn_reader, DisconnectReason, ErrorTracker, FrameAssembler, ReaderConfig, ReaderHandle};
pub use types::{DeviceEvent, LinkMetrics, LinkState, MessageKind};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Join `handle`, waiting at most `bound`. Returns false when the thread was
/// still running at the deadline; it is then left to finish on its own.
pub fn join_bounded(handle: JoinHandle<()>, bound: Duration, name: &str) -> bool {
    let deadline = Instant::now() + bound;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{} thread did not stop within {:?}", name, bound);
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        log::error!("{} thread panicked", name);
    }
    true
}
