mod common;

use std::sync::{Arc, Mutex};

use common::*;
use macropad_bridge_lib::commands::App;
use macropad_bridge_lib::config::{ButtonConfig, ConfigStore};
use macropad_bridge_lib::device::DeviceManager;
use macropad_bridge_lib::host::{self, ActionRunner, AudioControl};
use macropad_bridge_lib::serial::mock::{MockPort, MockPortProvider};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
enum HostCall {
    Hotkey(Vec<String>),
    Launch(String),
    AppVolume(String, f32),
    MasterVolume(f32),
}

#[derive(Default)]
struct RecordingHost {
    calls: Mutex<Vec<HostCall>>,
}

impl RecordingHost {
    fn calls(&self) -> Vec<HostCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl ActionRunner for RecordingHost {
    fn send_hotkey(&self, keys: &[String]) -> host::Result<()> {
        self.calls.lock().unwrap().push(HostCall::Hotkey(keys.to_vec()));
        Ok(())
    }

    fn launch(&self, app_path: &str) -> host::Result<()> {
        self.calls.lock().unwrap().push(HostCall::Launch(app_path.to_string()));
        Ok(())
    }
}

impl AudioControl for RecordingHost {
    fn set_app_volume(&self, process: &str, volume: f32) -> host::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(HostCall::AppVolume(process.to_string(), volume));
        Ok(())
    }

    fn set_master_volume(&self, volume: f32) -> host::Result<()> {
        self.calls.lock().unwrap().push(HostCall::MasterVolume(volume));
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    provider: Arc<MockPortProvider>,
    port: MockPort,
    host: Arc<RecordingHost>,
    app: Arc<App>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let mut store = ConfigStore::load_from(dir.path().join("config.json"));
    store
        .set_button_config(0, 0, ButtonConfig::hotkey("", "Mute", "Ctrl+Shift+M"))
        .unwrap();
    store
        .set_button_config(1, 2, ButtonConfig::launch("", "Editor", "/usr/bin/editor"))
        .unwrap();
    store
        .set_slider_apps(0, vec!["Discord.exe".to_string(), "chrome.exe".to_string()])
        .unwrap();

    let provider = Arc::new(MockPortProvider::new());
    let port = provider.plug("COM3");
    let device = Arc::new(manager(&provider));
    let host = Arc::new(RecordingHost::default());
    let app = App::new(device, store, host.clone(), host.clone());
    Fixture {
        _dir: dir,
        provider,
        port,
        host,
        app,
    }
}

fn device(f: &Fixture) -> &DeviceManager {
    f.app.device()
}

#[test]
fn button_presses_run_their_actions() {
    let f = fixture();
    assert!(f.app.handle_button_press(0, 0));
    assert!(f.app.handle_button_press(1, 2));
    assert!(!f.app.handle_button_press(2, 2));

    assert_eq!(
        f.host.calls(),
        vec![
            HostCall::Hotkey(vec!["ctrl".into(), "shift".into(), "m".into()]),
            HostCall::Launch("/usr/bin/editor".into()),
        ]
    );
}

#[test]
fn sliders_set_app_and_master_volume() {
    let f = fixture();
    f.app.handle_slider_change(0, 50);
    f.app.handle_slider_change(1, 80);
    f.app.handle_slider_change(3, 100);
    f.app.handle_slider_change(7, 10);

    assert_eq!(
        f.host.calls(),
        vec![
            HostCall::AppVolume("Discord.exe".into(), 0.5),
            HostCall::AppVolume("chrome.exe".into(), 0.5),
            HostCall::MasterVolume(1.0),
        ]
    );
}

#[test]
fn device_input_flows_through_the_queue() {
    let f = fixture();
    device(&f).connect("COM3").unwrap();
    f.port.push_line("READY");
    f.port.push_line("BTN_PRESS:0:0");
    f.port.push_line("MODE_CHANGE:2");

    assert!(wait_until(WAIT, || {
        device(&f).drain_events();
        f.app.current_mode() == 2 && !f.host.calls().is_empty()
    }));
    assert_eq!(
        f.host.calls()[0],
        HostCall::Hotkey(vec!["ctrl".into(), "shift".into(), "m".into()])
    );
    // The device's own mode change is not echoed back.
    assert!(!f.port.written_commands().iter().any(|l| l.starts_with("MODE:")));
}

#[test]
fn invalid_device_mode_is_ignored() {
    let f = fixture();
    f.app.handle_mode_change(9);
    assert_eq!(f.app.current_mode(), 0);
}

#[test]
fn switch_mode_notifies_the_device() {
    let f = fixture();
    device(&f).connect("COM3").unwrap();

    f.app.switch_mode(3).unwrap();
    assert_eq!(f.app.current_mode(), 3);
    assert!(f.app.switch_mode(4).is_err());
    assert_eq!(f.port.written_commands(), vec!["MODE:3"]);
}

#[test]
fn edits_are_pushed_only_while_connected() {
    let f = fixture();
    f.app
        .assign_button(2, 1, ButtonConfig::hotkey("", "Save", "ctrl+s"))
        .unwrap();
    assert!(f.port.written_lines().is_empty());

    device(&f).connect("COM3").unwrap();
    f.app
        .assign_button(2, 1, ButtonConfig::hotkey("", "Save", "ctrl+s"))
        .unwrap();
    f.app.clear_button(0, 0).unwrap();
    f.app.assign_slider(1, Vec::new()).unwrap();
    f.app.rename_mode(2, "Docs").unwrap();
    assert_eq!(f.app.add_mode().unwrap(), 5);

    assert_eq!(
        f.port.written_commands(),
        vec![
            "BTN:2:1:ctrl+s:Save",
            "CLEAR:0:0",
            "SLIDER:1:NONE",
            "MODE_NAME:2:Docs",
            "MODE_COUNT:5",
            "MODE_NAME:4:Mode 5",
        ]
    );
    assert_eq!(f.app.config().mode_name(2), "Docs");
}

#[test]
fn removing_a_mode_renumbers_the_device() {
    let f = fixture();
    device(&f).connect("COM3").unwrap();
    f.app.switch_mode(3).unwrap();
    f.port.clear_written();

    assert_eq!(f.app.remove_mode(0).unwrap(), 3);

    let mut expected: Vec<String> = (0..9).map(|b| format!("CLEAR:0:{}", b)).collect();
    expected.push("BTN:0:2::Editor".to_string());
    expected.push("CLEAR:1:2".to_string());
    expected.push("MODE_NAME:0:Mode 1".to_string());
    expected.push("MODE_NAME:1:Mode 2".to_string());
    expected.push("MODE_NAME:2:Mode 3".to_string());
    expected.push("MODE_COUNT:3".to_string());
    assert_eq!(f.port.written_commands(), expected);

    assert_eq!(f.app.current_mode(), 2);
    assert_eq!(f.app.config().button_config(0, 2).unwrap().label, "Editor");
}

#[test]
fn bring_up_syncs_once_per_connection() {
    let f = fixture();
    device(&f).connect("COM3").unwrap();
    f.port.push_line("READY:v2");

    assert_eq!(f.app.bring_up().unwrap(), 6);
    assert_eq!(f.app.bring_up().unwrap(), 0);

    let commands = f.port.written_commands();
    assert_eq!(commands.iter().filter(|l| *l == "SYNC_START").count(), 1);
    assert_eq!(commands.first().map(String::as_str), Some("SYNC_START"));
    assert_eq!(commands.last().map(String::as_str), Some("SYNC_END"));
    assert!(commands.contains(&"SLIDER:0:Discord.exe,chrome.exe".to_string()));
}

#[test]
fn bring_up_times_out_without_device() {
    let f = fixture();
    device(&f).connect("COM3").unwrap();
    assert!(f.app.bring_up().is_err());
    assert!(device(&f).is_connected());
}

#[tokio::test(flavor = "multi_thread")]
async fn connecting_triggers_a_single_sync() {
    let f = fixture();
    f.port.push_line("READY");
    f.app.select_port("COM3").unwrap();

    let port = f.port.clone();
    let app = f.app.clone();
    let synced = tokio::task::spawn_blocking(move || {
        wait_until(WAIT, || {
            app.device().drain_events();
            port.written_commands().contains(&"SYNC_END".to_string())
        })
    })
    .await
    .unwrap();
    assert!(synced);
    assert_eq!(f.app.config().preferred_port(), Some("COM3"));

    // A repeated READY does not start another sync.
    f.port.push_line("READY");
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    f.app.device().drain_events();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let starts = f
        .port
        .written_commands()
        .iter()
        .filter(|l| *l == "SYNC_START")
        .count();
    assert_eq!(starts, 1);

    let app = f.app.clone();
    tokio::task::spawn_blocking(move || app.shutdown()).await.unwrap();
    assert_eq!(f.provider.open_attempts(), 1);
}

#[test]
fn health_tick_reports_the_link() {
    let f = fixture();
    assert_eq!(f.app.health_tick(), "not connected");

    device(&f).connect("COM3").unwrap();
    assert_eq!(f.app.health_tick(), "connected to COM3");

    f.provider.unplug("COM3");
    device(&f).start_auto_reconnect("COM3").unwrap();
    assert!(wait_until(WAIT, || f.app.health_tick() == "searching for COM3..."));
    f.app.shutdown();
    assert_eq!(f.app.health_tick(), "not connected");
}

#[test]
fn start_without_port_does_nothing() {
    let f = fixture();
    assert!(!f.app.start().unwrap());
    assert!(!device(&f).is_reconnect_active());
}

#[test]
fn import_replaces_config_and_resets_mode() {
    let f = fixture();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("small.json");
    std::fs::write(&path, r#"{"version": 2, "num_modes": 2}"#).unwrap();

    f.app.switch_mode(3).unwrap();
    assert_eq!(f.app.import_config(&path).unwrap(), 0);
    assert_eq!(f.app.current_mode(), 0);
    assert!(f.app.config().button_config(0, 0).is_none());

    let out = dir.path().join("out.json");
    f.app.export_config(&out).unwrap();
    assert!(out.exists());
}

#[test]
fn removing_a_mode_sends_shifted_names() {
    let f = fixture();
    f.app.rename_mode(2, "Games").unwrap();
    device(&f).connect("COM3").unwrap();

    assert_eq!(f.app.remove_mode(1).unwrap(), 3);

    let names: Vec<String> = f
        .port
        .written_commands()
        .into_iter()
        .filter(|l| l.starts_with("MODE_NAME:"))
        .collect();
    assert_eq!(names, vec!["MODE_NAME:1:Games", "MODE_NAME:2:Mode 3"]);
    assert_eq!(f.app.config().mode_name(1), "Games");
}
