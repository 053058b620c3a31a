mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::*;
use macropad_bridge_lib::device::{DeviceManager, LinkSettings};
use macropad_bridge_lib::serial::mock::MockPortProvider;

#[test]
fn absent_port_is_never_opened() {
    let provider = Arc::new(MockPortProvider::new());
    provider.plug("COM1");
    let manager = manager(&provider);

    manager.start_auto_reconnect("COM9").unwrap();
    assert!(manager.is_reconnect_active());
    assert!(wait_until(WAIT, || provider.list_calls() >= 3));

    manager.stop_auto_reconnect();
    assert_eq!(provider.open_attempts(), 0);
    assert!(!manager.is_connected());
    assert!(!manager.is_reconnect_active());
}

#[test]
fn stop_does_not_wait_for_the_interval() {
    let provider = Arc::new(MockPortProvider::new());
    let settings = LinkSettings {
        reconnect_interval_ms: 10_000,
        ..LinkSettings::fast()
    };
    let manager = DeviceManager::new(provider.clone(), settings);

    manager.start_auto_reconnect("COM9").unwrap();
    assert!(wait_until(WAIT, || provider.list_calls() >= 1));

    let started = Instant::now();
    manager.stop_auto_reconnect();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!manager.is_reconnect_active());
}

#[test]
fn reconnects_after_the_port_comes_back() {
    let provider = Arc::new(MockPortProvider::new());
    provider.plug("COM3");
    let manager = manager(&provider);
    let seen = record_events(&manager);

    manager.start_auto_reconnect("COM3").unwrap();
    assert!(wait_until(WAIT, || manager.is_connected()));

    provider.unplug("COM3");
    assert!(drain_until(&manager, &seen, |events| disconnects(events) == 1));

    // Absent: the loop keeps looking without opening anything.
    let attempts = provider.open_attempts();
    let lists = provider.list_calls();
    assert!(wait_until(WAIT, || provider.list_calls() >= lists + 2));
    assert_eq!(provider.open_attempts(), attempts);

    let port = provider.plug("COM3");
    assert!(drain_until(&manager, &seen, |events| connects(events) == 2));
    assert!(manager.is_connected());
    assert_eq!(manager.connected_port().as_deref(), Some("COM3"));

    port.push_line("BTN_PRESS:0:4");
    assert!(drain_until(&manager, &seen, |events| events.len() == 4));

    let connected: Vec<bool> = seen
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            macropad_bridge_lib::serial::link::DeviceEvent::ConnectionChanged { connected, .. } => {
                Some(*connected)
            }
            _ => None,
        })
        .collect();
    assert_eq!(connected, vec![true, false, true]);

    manager.disconnect();
    assert!(!manager.is_reconnect_active());
}

#[test]
fn connected_loop_stays_idle() {
    let provider = Arc::new(MockPortProvider::new());
    provider.plug("COM3");
    let manager = manager(&provider);

    manager.connect("COM3").unwrap();
    manager.start_auto_reconnect("COM3").unwrap();
    std::thread::sleep(Duration::from_millis(100));

    assert_eq!(provider.open_attempts(), 1);
    assert!(manager.get_connection_status().reconnect_active);
}

#[test]
fn second_start_is_a_no_op() {
    let provider = Arc::new(MockPortProvider::new());
    let manager = manager(&provider);

    manager.start_auto_reconnect("COM3").unwrap();
    manager.start_auto_reconnect("COM4").unwrap();
    assert_eq!(manager.preferred_port().as_deref(), Some("COM3"));
    manager.stop_auto_reconnect();
}

#[test]
fn preferred_port_change_is_followed() {
    let provider = Arc::new(MockPortProvider::new());
    provider.plug("COM4");
    let manager = manager(&provider);

    manager.start_auto_reconnect("COM3").unwrap();
    assert!(wait_until(WAIT, || provider.list_calls() >= 2));
    assert!(!manager.is_connected());

    manager.set_preferred_port(Some("COM4".to_string()));
    assert!(wait_until(WAIT, || manager.is_connected()));
    assert_eq!(manager.connected_port().as_deref(), Some("COM4"));
    manager.disconnect();
}
