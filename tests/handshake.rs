mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use macropad_bridge_lib::device::ConnectionState;
use macropad_bridge_lib::serial::link::DeviceEvent;
use macropad_bridge_lib::serial::mock::MockPortProvider;

fn ready_events(events: &[DeviceEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, DeviceEvent::Ready { .. }))
        .count()
}

#[test]
fn repeated_ready_completes_handshake_once() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    port.push_line("READY:v2.1");
    port.push_line("READY:v2.1");

    let manager = manager(&provider);
    let seen = record_events(&manager);
    manager.connect("COM3").unwrap();

    assert!(manager.wait_for_ready(WAIT));
    assert!(wait_until(WAIT, || {
        manager.get_connection_status().metrics.repeated_handshakes == 1
    }));

    assert!(manager.claim_handshake());
    assert!(!manager.claim_handshake());
    assert!(manager.wait_for_ready(Duration::from_millis(10)));

    manager.drain_events();
    assert_eq!(ready_events(&seen.lock().unwrap()), 1);
}

#[test]
fn pong_after_ready_is_logged_only() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    port.push_line("READY");
    port.push_line("Pong");

    let manager = manager(&provider);
    let seen = record_events(&manager);
    manager.connect("COM3").unwrap();

    assert!(manager.wait_for_ready(WAIT));
    assert!(wait_until(WAIT, || {
        manager.get_connection_status().metrics.frames_received == 2
    }));
    assert!(manager.claim_handshake());
    assert!(!manager.claim_handshake());

    manager.drain_events();
    assert_eq!(ready_events(&seen.lock().unwrap()), 1);
}

#[test]
fn pong_completes_handshake_for_running_device() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    let manager = manager(&provider);
    manager.connect("COM3").unwrap();
    assert_eq!(manager.connection_state(), ConnectionState::AwaitingHandshake);

    // The device answers the PING sent by wait_for_ready.
    let responder = {
        let port = port.clone();
        std::thread::spawn(move || {
            assert!(wait_until(WAIT, || port.written_lines().contains(&"PING".to_string())));
            port.push_line("Pong");
        })
    };

    assert!(manager.wait_for_ready(WAIT));
    responder.join().unwrap();
    assert_eq!(manager.connection_state(), ConnectionState::Ready);
}

#[test]
fn wait_for_ready_times_out_and_keeps_connection() {
    let provider = Arc::new(MockPortProvider::new());
    provider.plug("COM3");
    let manager = manager(&provider);
    manager.connect("COM3").unwrap();

    assert!(!manager.wait_for_ready(Duration::from_millis(50)));
    assert!(manager.is_connected());
    assert!(!manager.claim_handshake());
}

#[test]
fn handshake_state_resets_on_reconnect() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    port.push_line("READY");
    let manager = manager(&provider);

    manager.connect("COM3").unwrap();
    assert!(manager.wait_for_ready(WAIT));
    assert!(manager.claim_handshake());
    manager.disconnect();

    manager.connect("COM3").unwrap();
    assert!(!manager.is_ready());
    assert!(!manager.claim_handshake());
    port.push_line("READY");
    assert!(manager.wait_for_ready(WAIT));
    assert!(manager.claim_handshake());
}

#[test]
fn wait_for_ready_without_connection_fails_fast() {
    let provider = Arc::new(MockPortProvider::new());
    let manager = manager(&provider);
    assert!(!manager.wait_for_ready(WAIT));
}
