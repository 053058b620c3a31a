//! Application layer: turns device input into host actions and pushes
//! configuration edits to the device.
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::config::{
    ButtonAction, ButtonConfig, ConfigError, ConfigStore, BUTTONS_PER_MODE, MASTER_SLIDER, NUM_SLIDERS,
};
use crate::device::{DeviceError, DeviceManager, Result};
use crate::host::{ActionRunner, AudioControl};
use crate::serial::link::{lock, DeviceEvent, MessageKind};

pub struct App {
    device: Arc<DeviceManager>,
    store: Mutex<ConfigStore>,
    actions: Arc<dyn ActionRunner>,
    audio: Arc<dyn AudioControl>,
    current_mode: AtomicUsize,
    status_line: Mutex<String>,
}

impl App {
    /// Create the application and register its device event handlers.
    pub fn new(
        device: Arc<DeviceManager>,
        store: ConfigStore,
        actions: Arc<dyn ActionRunner>,
        audio: Arc<dyn AudioControl>,
    ) -> Arc<Self> {
        let app = Arc::new(Self {
            device,
            store: Mutex::new(store),
            actions,
            audio,
            current_mode: AtomicUsize::new(0),
            status_line: Mutex::new(String::new()),
        });
        app.register_handlers();
        app
    }

    fn register_handlers(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        for kind in MessageKind::ALL {
            let weak: Weak<Self> = weak.clone();
            self.device.register_handler(kind, move |event| {
                if let Some(app) = weak.upgrade() {
                    app.on_event(event);
                }
            });
        }
    }

    pub fn device(&self) -> &Arc<DeviceManager> {
        &self.device
    }

    /// A copy of the current configuration.
    pub fn config(&self) -> ConfigStore {
        lock(&self.store).clone()
    }

    pub fn current_mode(&self) -> usize {
        self.current_mode.load(Ordering::SeqCst)
    }

    fn on_event(self: &Arc<Self>, event: &DeviceEvent) {
        match event {
            DeviceEvent::ButtonPress { mode, button } => {
                self.handle_button_press(usize::from(*mode), usize::from(*button));
            }
            DeviceEvent::SliderChange { slider, value } => {
                self.handle_slider_change(usize::from(*slider), *value);
            }
            DeviceEvent::ModeChange { mode } => self.handle_mode_change(usize::from(*mode)),
            DeviceEvent::Ready { info } => {
                if info.is_empty() {
                    log::info!("Device ready");
                } else {
                    log::info!("Device ready ({})", info);
                }
            }
            DeviceEvent::ConnectionChanged { connected: true, port } => {
                log::info!("Connected to {}, waiting for device", port);
                self.spawn_bring_up();
            }
            DeviceEvent::ConnectionChanged { connected: false, port } => {
                log::info!("Connection to {} lost", port);
            }
        }
    }

    /// Run the action bound to `(mode, button)`. Returns false when nothing
    /// ran.
    pub fn handle_button_press(&self, mode: usize, button: usize) -> bool {
        log::info!("Device button press: mode {}, button {}", mode, button);
        let Some(config) = lock(&self.store).button_config(mode, button).cloned() else {
            log::warn!("Button {} in mode {} not configured", button, mode);
            return false;
        };

        let result = match (&config.action, config.hotkey_keys()) {
            (ButtonAction::Launch { app_path }, _) => self.actions.launch(app_path),
            (_, Some(keys)) => self.actions.send_hotkey(&keys),
            (_, None) => {
                log::warn!("No hotkey configured for button {}", button);
                return false;
            }
        };

        match result {
            Ok(()) => {
                log::info!("Executed '{}'", config.label);
                true
            }
            Err(e) => {
                log::error!("Error executing '{}': {}", config.label, e);
                false
            }
        }
    }

    /// Apply a slider position (0-100). Slider 3 drives the master volume,
    /// the others every app assigned to them.
    pub fn handle_slider_change(&self, slider: usize, value: u8) {
        if slider >= NUM_SLIDERS {
            log::warn!("Slider {} out of range (max {})", slider, NUM_SLIDERS - 1);
            return;
        }
        log::debug!("Device slider {} changed to {}%", slider, value);
        let volume = f32::from(value) / 100.0;

        if slider == MASTER_SLIDER {
            if let Err(e) = self.audio.set_master_volume(volume) {
                log::warn!("Could not set master volume: {}", e);
            }
            return;
        }

        let apps = lock(&self.store).slider_apps(slider).to_vec();
        if apps.is_empty() {
            log::debug!("Slider {} has no apps assigned", slider);
            return;
        }
        for app in &apps {
            if let Err(e) = self.audio.set_app_volume(app, volume) {
                log::warn!("Could not set volume for {}: {}", app, e);
            }
        }
    }

    /// The device switched modes on its own; track it without echoing.
    pub fn handle_mode_change(&self, mode: usize) {
        let num_modes = lock(&self.store).num_modes();
        if mode >= num_modes {
            log::warn!("Device reported invalid mode {} ({} configured)", mode, num_modes);
            return;
        }
        self.current_mode.store(mode, Ordering::SeqCst);
        log::info!("Device changed mode to {}", mode + 1);
    }

    fn spawn_bring_up(self: &Arc<Self>) {
        let app = self.clone();
        let task = move || {
            if let Err(e) = app.bring_up() {
                log::warn!("Device bring-up failed: {}", e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(task);
            }
            Err(_) => {
                if let Err(e) = std::thread::Builder::new().name("bring-up".to_string()).spawn(task) {
                    log::error!("Failed to start bring-up thread: {}", e);
                }
            }
        }
    }

    /// Wait for the handshake and run the initial sync once per connection.
    /// Returns the number of configs synced (0 when another caller already
    /// synced this connection).
    pub fn bring_up(&self) -> Result<usize> {
        let timeout = self.device.settings().handshake_timeout();
        if !self.device.wait_for_ready(timeout) {
            log::warn!("Connected but no response from device");
            return Err(DeviceError::HandshakeTimeout(timeout));
        }
        if !self.device.claim_handshake() {
            log::debug!("Handshake already handled for this connection");
            return Ok(0);
        }
        Ok(self.sync_now())
    }

    /// Push the whole configuration to the device.
    pub fn sync_now(&self) -> usize {
        let snapshot = self.config();
        let sliders = snapshot.slider_assignments();
        self.device.sync_all_configs(&snapshot, &sliders)
    }

    /// Send a frame if connected. Send failures are logged, not returned.
    fn push(&self, what: &str, send: impl FnOnce(&DeviceManager) -> Result<()>) {
        if !self.device.is_connected() {
            return;
        }
        if let Err(e) = send(&self.device) {
            log::warn!("Failed to send {}: {}", what, e);
        }
    }

    pub fn switch_mode(&self, mode: usize) -> Result<()> {
        let num_modes = lock(&self.store).num_modes();
        if mode >= num_modes {
            return Err(ConfigError::InvalidIndex {
                what: "mode",
                index: mode,
                limit: num_modes,
            }
            .into());
        }
        self.current_mode.store(mode, Ordering::SeqCst);
        self.push("MODE", |d| d.send_mode_switch(mode));
        log::info!("Switched to mode {}", mode + 1);
        Ok(())
    }

    pub fn assign_button(&self, mode: usize, button: usize, config: ButtonConfig) -> Result<()> {
        lock(&self.store).set_button_config(mode, button, config.clone())?;
        self.push("BTN", |d| d.send_button_config(mode, button, &config));
        Ok(())
    }

    pub fn clear_button(&self, mode: usize, button: usize) -> Result<()> {
        lock(&self.store).clear_button_config(mode, button)?;
        self.push("CLEAR", |d| d.send_clear_button(mode, button));
        Ok(())
    }

    pub fn assign_slider(&self, slider: usize, apps: Vec<String>) -> Result<()> {
        let apps = {
            let mut store = lock(&self.store);
            store.set_slider_apps(slider, apps)?;
            store.slider_apps(slider).to_vec()
        };
        self.push("SLIDER", |d| d.send_slider_config(slider, &apps));
        Ok(())
    }

    /// Returns the new mode count.
    pub fn add_mode(&self) -> Result<usize> {
        let (count, name) = {
            let mut store = lock(&self.store);
            let count = store.add_mode()?;
            (count, store.mode_name(count - 1))
        };
        self.push("MODE_COUNT", |d| d.send_mode_count(count));
        self.push("MODE_NAME", |d| d.send_mode_name(count - 1, &name));
        log::info!("Added mode {}", count);
        Ok(count)
    }

    /// Delete `mode`; later modes are renumbered on the host and the device.
    /// Returns the new mode count.
    pub fn remove_mode(&self, mode: usize) -> Result<usize> {
        let (before, count) = {
            let mut store = lock(&self.store);
            let before = store.config().clone();
            let count = store.remove_mode(mode)?;
            (before, count)
        };

        for button in 0..BUTTONS_PER_MODE {
            self.push("CLEAR", |d| d.send_clear_button(mode, button));
        }
        for shifted in mode + 1..before.num_modes {
            for button in 0..BUTTONS_PER_MODE {
                if let Some(config) = before.buttons.get(shifted, button) {
                    self.push("BTN", |d| d.send_button_config(shifted - 1, button, config));
                    self.push("CLEAR", |d| d.send_clear_button(shifted, button));
                }
            }
            // Default names move with the index too.
            let name = lock(&self.store).mode_name(shifted - 1);
            self.push("MODE_NAME", |d| d.send_mode_name(shifted - 1, &name));
        }
        self.push("MODE_COUNT", |d| d.send_mode_count(count));

        let current = self.current_mode();
        if current >= count {
            self.current_mode.store(count - 1, Ordering::SeqCst);
        }
        Ok(count)
    }

    pub fn rename_mode(&self, mode: usize, name: &str) -> Result<()> {
        let name = lock(&self.store).set_mode_name(mode, name)?;
        self.push("MODE_NAME", |d| d.send_mode_name(mode, &name));
        Ok(())
    }

    /// Remember `port` and keep reconnecting to it.
    pub fn select_port(&self, port: &str) -> Result<()> {
        lock(&self.store).set_preferred_port(port)?;
        if self.device.connected_port().as_deref() != Some(port) {
            // Also stops a reconnect loop aimed at the old port.
            self.device.disconnect();
        }
        self.device.stop_auto_reconnect();
        self.device.start_auto_reconnect(port)
    }

    /// Start reconnecting to the saved preferred port, if any. Returns false
    /// when no port is configured.
    pub fn start(&self) -> Result<bool> {
        let port = lock(&self.store).preferred_port().map(str::to_string);
        match port {
            Some(port) => {
                self.device.start_auto_reconnect(&port)?;
                Ok(true)
            }
            None => {
                log::info!("No preferred port configured");
                Ok(false)
            }
        }
    }

    /// Replace the configuration from `path` and re-sync when connected.
    /// Returns the number of configs synced.
    pub fn import_config(&self, path: &Path) -> Result<usize> {
        lock(&self.store).import_from(path)?;
        if self.current_mode() >= lock(&self.store).num_modes() {
            self.current_mode.store(0, Ordering::SeqCst);
        }
        if self.device.is_ready() {
            return Ok(self.sync_now());
        }
        Ok(0)
    }

    pub fn export_config(&self, path: &Path) -> Result<()> {
        lock(&self.store).export_to(path)?;
        Ok(())
    }

    pub fn now_playing(&self, artist: &str, title: &str) -> Result<()> {
        self.device.send_now_playing(artist, title)
    }

    /// Check link health and log the status line when it changed. Returns
    /// the current line.
    pub fn health_tick(&self) -> String {
        let healthy = self.device.check_connection_health();
        let line = match (healthy, self.device.connected_port(), self.device.preferred_port()) {
            (true, Some(port), _) => format!("connected to {}", port),
            (_, _, Some(preferred)) if self.device.is_reconnect_active() => {
                format!("searching for {}...", preferred)
            }
            _ => "not connected".to_string(),
        };

        let mut last = lock(&self.status_line);
        if *last != line {
            log::info!("Status: {}", line);
            *last = line.clone();
        }
        line
    }

    pub fn shutdown(&self) {
        log::info!("Shutting down");
        self.device.disconnect();
    }
}
