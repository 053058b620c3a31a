mod common;

use std::sync::Arc;

use common::*;
use macropad_bridge_lib::serial::link::DeviceEvent;
use macropad_bridge_lib::serial::mock::MockPortProvider;
use macropad_bridge_lib::serial::protocol;

#[test]
fn button_frame_round_trip() {
    assert_eq!(
        protocol::button_config(2, 5, "ctrl+shift+m", "Mute"),
        "BTN:2:5:ctrl+shift+m:Mute"
    );

    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    let manager = manager(&provider);
    let seen = record_events(&manager);

    manager.connect("COM3").unwrap();
    port.push_line("BTN_PRESS:2:5");

    assert!(drain_until(&manager, &seen, |events| {
        events.contains(&DeviceEvent::ButtonPress { mode: 2, button: 5 })
    }));
}

#[test]
fn malformed_frame_does_not_stop_the_reader() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    port.push_line("SLIDER_CHANGE:abc:xyz");
    port.push_line("SLIDER_CHANGE:1:42");

    let manager = manager(&provider);
    let seen = record_events(&manager);
    manager.connect("COM3").unwrap();

    assert!(drain_until(&manager, &seen, |events| {
        events.contains(&DeviceEvent::SliderChange { slider: 1, value: 42 })
    }));

    let status = manager.get_connection_status();
    assert!(status.connected);
    assert!(status.reader_alive);
    assert_eq!(status.metrics.malformed_frames, 1);
    assert_eq!(status.metrics.frames_received, 1);
}

#[test]
fn frames_split_across_reads_are_reassembled_in_order() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    port.push_bytes(b"MODE_CHA");
    port.push_bytes(b"NGE:1\r\nBTN_PRESS:1:");
    port.push_bytes(b"0\nACK_BTN\nbooting\n");

    let manager = manager(&provider);
    let seen = record_events(&manager);
    manager.connect("COM3").unwrap();

    assert!(drain_until(&manager, &seen, |events| events.len() >= 3));
    let events = seen.lock().unwrap();
    assert_eq!(
        events[1..],
        [
            DeviceEvent::ModeChange { mode: 1 },
            DeviceEvent::ButtonPress { mode: 1, button: 0 },
        ]
    );
}

#[test]
fn last_registered_handler_wins() {
    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    let manager = manager(&provider);

    let first = record_events(&manager);
    let second = record_events(&manager);
    manager.connect("COM3").unwrap();
    port.push_line("MODE_CHANGE:2");

    assert!(drain_until(&manager, &second, |events| {
        events.contains(&DeviceEvent::ModeChange { mode: 2 })
    }));
    assert!(first.lock().unwrap().is_empty());
}
