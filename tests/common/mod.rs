#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use macropad_bridge_lib::device::{DeviceManager, LinkSettings};
use macropad_bridge_lib::serial::link::{DeviceEvent, MessageKind};
use macropad_bridge_lib::serial::mock::MockPortProvider;

pub const WAIT: Duration = Duration::from_secs(2);

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn manager(provider: &Arc<MockPortProvider>) -> DeviceManager {
    DeviceManager::new(provider.clone(), LinkSettings::fast())
}

/// Register a handler for every kind that records the events it sees.
pub fn record_events(manager: &DeviceManager) -> Arc<Mutex<Vec<DeviceEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in MessageKind::ALL {
        let seen = seen.clone();
        manager.register_handler(kind, move |event| seen.lock().unwrap().push(event.clone()));
    }
    seen
}

/// Drain the event queue until `cond` holds for the recorded events.
pub fn drain_until(
    manager: &DeviceManager,
    seen: &Arc<Mutex<Vec<DeviceEvent>>>,
    cond: impl Fn(&[DeviceEvent]) -> bool,
) -> bool {
    wait_until(WAIT, || {
        manager.drain_events();
        cond(&seen.lock().unwrap())
    })
}

pub fn disconnects(events: &[DeviceEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DeviceEvent::ConnectionChanged { connected: false, .. }))
        .count()
}

pub fn connects(events: &[DeviceEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DeviceEvent::ConnectionChanged { connected: true, .. }))
        .count()
}
