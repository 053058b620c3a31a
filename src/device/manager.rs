use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::config::ButtonConfig;
use crate::serial::link::{
    lock, spawn_reader, DeviceEvent, DisconnectReason, LineDispatcher, LinkState, MessageKind,
    ReaderHandle,
};
use crate::serial::{
    protocol, PortProvider, SerialError, SerialInterface, SerialPortInfo, BAUD_RATE,
};
use super::handlers::MessageHandlers;
use super::port_monitor::{AutoReconnect, ReconnectTarget};
use super::sync::{ConfigSource, FrameSink, SyncEngine};
use super::{ConnectionState, ConnectionStatus, DeviceError, LinkSettings, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Opening,
    Open,
}

/// The single live serial session. Only mutated while holding the
/// connection mutex.
struct Connection {
    phase: Phase,
    /// Bumped on every connect so callbacks from an older reader are ignored
    generation: u64,
    port_name: Option<String>,
    transport: Option<Arc<Mutex<SerialInterface>>>,
    link: Option<Arc<LinkState>>,
    reader: Option<ReaderHandle>,
    connected_since: Option<DateTime<Utc>>,
}

/// What is left to shut down after leaving the `Open` phase.
struct Teardown {
    port_name: String,
    transport: Option<Arc<Mutex<SerialInterface>>>,
    reader: Option<ReaderHandle>,
}

impl Connection {
    fn new() -> Self {
        Self {
            phase: Phase::Idle,
            generation: 0,
            port_name: None,
            transport: None,
            link: None,
            reader: None,
            connected_since: None,
        }
    }

    fn live_link(&self) -> Option<Arc<LinkState>> {
        match self.phase {
            Phase::Open => self.link.clone(),
            _ => None,
        }
    }

    fn live_transport(&self) -> Option<Arc<Mutex<SerialInterface>>> {
        match self.phase {
            Phase::Open => self.transport.clone(),
            _ => None,
        }
    }

    fn state(&self) -> ConnectionState {
        match self.phase {
            Phase::Idle => ConnectionState::Disconnected,
            Phase::Opening => ConnectionState::Connecting,
            Phase::Open => match &self.link {
                Some(link) if link.handshake_received() => ConnectionState::Ready,
                _ => ConnectionState::AwaitingHandshake,
            },
        }
    }

    fn teardown(&mut self) -> Teardown {
        self.phase = Phase::Idle;
        self.link = None;
        self.connected_since = None;
        Teardown {
            port_name: self.port_name.take().unwrap_or_default(),
            transport: self.transport.take(),
            reader: self.reader.take(),
        }
    }
}

struct Shared {
    provider: Arc<dyn PortProvider>,
    settings: LinkSettings,
    connection: Mutex<Connection>,
    preferred_port: Mutex<Option<String>>,
    reconnect: Mutex<Option<AutoReconnect>>,
    handlers: RwLock<MessageHandlers>,
    events_tx: UnboundedSender<DeviceEvent>,
    events_rx: Mutex<UnboundedReceiver<DeviceEvent>>,
}

impl Shared {
    fn emit(&self, event: DeviceEvent) {
        if self.events_tx.send(event).is_err() {
            log::debug!("Event queue closed, dropping event");
        }
    }

    fn connect(self: &Arc<Self>, port_name: &str) -> Result<()> {
        let generation = {
            let mut conn = lock(&self.connection);
            if conn.phase != Phase::Idle {
                return Err(DeviceError::AlreadyConnected);
            }
            conn.phase = Phase::Opening;
            conn.generation += 1;
            conn.port_name = Some(port_name.to_string());
            conn.generation
        };
        *lock(&self.preferred_port) = Some(port_name.to_string());

        log::info!("Connecting to {} at {} baud", port_name, BAUD_RATE);
        let transport = match SerialInterface::open(&*self.provider, port_name, BAUD_RATE) {
            Ok(transport) => Arc::new(Mutex::new(transport)),
            Err(e) => {
                log::error!("Connection error: {}", e);
                let mut conn = lock(&self.connection);
                if conn.generation == generation && conn.phase == Phase::Opening {
                    conn.phase = Phase::Idle;
                    conn.port_name = None;
                }
                return Err(e.into());
            }
        };

        let link = Arc::new(LinkState::new());
        let dispatcher = LineDispatcher::new(link.clone(), self.events_tx.clone());
        let weak = Arc::downgrade(self);
        let on_disconnect = Box::new(move |reason: DisconnectReason| {
            if let Some(shared) = weak.upgrade() {
                shared.fault(Some(generation), &format!("{:?}", reason));
            }
        });

        let mut conn = lock(&self.connection);
        if conn.generation != generation || conn.phase != Phase::Opening {
            lock(&transport).close();
            return Err(SerialError::ConnectionFailed(format!(
                "connect to {} cancelled",
                port_name
            ))
            .into());
        }

        // Announced before the reader starts so it precedes any device event.
        self.emit(DeviceEvent::ConnectionChanged {
            connected: true,
            port: port_name.to_string(),
        });

        let reader = match spawn_reader(
            transport.clone(),
            dispatcher,
            self.settings.reader_config(),
            on_disconnect,
        ) {
            Ok(reader) => reader,
            Err(e) => {
                log::error!("Failed to start read thread: {}", e);
                lock(&transport).close();
                conn.phase = Phase::Idle;
                conn.port_name = None;
                self.emit(DeviceEvent::ConnectionChanged {
                    connected: false,
                    port: port_name.to_string(),
                });
                return Err(e.into());
            }
        };

        conn.phase = Phase::Open;
        conn.transport = Some(transport);
        conn.link = Some(link);
        conn.reader = Some(reader);
        conn.connected_since = Some(Utc::now());

        log::info!("Connected to {}", port_name);
        Ok(())
    }

    /// Fault path. No-op unless a connection is open, and, when
    /// `generation` is given, unless it is still that connection.
    fn fault(&self, generation: Option<u64>, reason: &str) -> bool {
        let mut conn = lock(&self.connection);
        if conn.phase != Phase::Open {
            return false;
        }
        if generation.map(|g| g != conn.generation).unwrap_or(false) {
            return false;
        }

        let teardown = conn.teardown();
        log::warn!("Handling disconnection of {}: {}", teardown.port_name, reason);
        if let Some(reader) = &teardown.reader {
            reader.signal_stop();
        }
        if let Some(transport) = &teardown.transport {
            lock(transport).close();
        }
        self.emit(DeviceEvent::ConnectionChanged {
            connected: false,
            port: teardown.port_name,
        });
        log::info!("Disconnected - auto-reconnect will continue if enabled");
        true
    }

    fn is_connected(&self) -> bool {
        lock(&self.connection).phase == Phase::Open
    }
}

/// Keeps the reconnect thread from holding the manager alive.
struct ManagerTarget {
    shared: Weak<Shared>,
}

impl ReconnectTarget for ManagerTarget {
    fn is_connected(&self) -> bool {
        // A dropped manager has nothing to reconnect.
        self.shared.upgrade().map(|s| s.is_connected()).unwrap_or(true)
    }

    fn preferred_port(&self) -> Option<String> {
        let shared = self.shared.upgrade()?;
        let port = lock(&shared.preferred_port).clone();
        port
    }

    fn available_ports(&self) -> std::result::Result<Vec<SerialPortInfo>, SerialError> {
        match self.shared.upgrade() {
            Some(shared) => shared.provider.list_ports(),
            None => Ok(Vec::new()),
        }
    }

    fn try_connect(&self, port_name: &str) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.connect(port_name).is_ok(),
            None => false,
        }
    }
}

/// Owns the connection lifecycle: connect, handshake, sync, fault handling
/// and auto-reconnect. All methods are callable from any thread.
pub struct DeviceManager {
    shared: Arc<Shared>,
}

impl DeviceManager {
    pub fn new(provider: Arc<dyn PortProvider>, settings: LinkSettings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                provider,
                settings,
                connection: Mutex::new(Connection::new()),
                preferred_port: Mutex::new(None),
                reconnect: Mutex::new(None),
                handlers: RwLock::new(MessageHandlers::new()),
                events_tx,
                events_rx: Mutex::new(events_rx),
            }),
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.shared.settings
    }

    /// Enumerate serial ports
    pub fn list_ports(&self) -> Result<Vec<SerialPortInfo>> {
        Ok(self.shared.provider.list_ports()?)
    }

    /// Open `port_name` and start the reader. Also remembers the port as the
    /// preferred port.
    pub fn connect(&self, port_name: &str) -> Result<()> {
        self.shared.connect(port_name)
    }

    /// Stop auto-reconnect and the reader, then close the port. Safe to call
    /// when already disconnected.
    pub fn disconnect(&self) {
        self.stop_auto_reconnect();

        let teardown = {
            let mut conn = lock(&self.shared.connection);
            match conn.phase {
                Phase::Idle => return,
                Phase::Opening => {
                    // The pending connect notices and backs out.
                    conn.phase = Phase::Idle;
                    conn.port_name = None;
                    return;
                }
                Phase::Open => {}
            }
            let teardown = conn.teardown();
            if let Some(reader) = &teardown.reader {
                reader.signal_stop();
            }
            if let Some(transport) = &teardown.transport {
                lock(transport).close();
            }
            self.shared.emit(DeviceEvent::ConnectionChanged {
                connected: false,
                port: teardown.port_name.clone(),
            });
            teardown
        };

        // Joined outside the lock: the reader may be waiting on it.
        if let Some(reader) = teardown.reader {
            reader.stop(self.shared.settings.join_timeout());
        }
        log::info!("Disconnected from {}", teardown.port_name);
    }

    /// Force the fault path on the current connection. Returns false when
    /// there was nothing to tear down.
    pub fn handle_disconnection(&self) -> bool {
        self.shared.fault(None, "requested")
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    pub fn connection_state(&self) -> ConnectionState {
        lock(&self.shared.connection).state()
    }

    pub fn connected_port(&self) -> Option<String> {
        let conn = lock(&self.shared.connection);
        match conn.phase {
            Phase::Open => conn.port_name.clone(),
            _ => None,
        }
    }

    pub fn preferred_port(&self) -> Option<String> {
        lock(&self.shared.preferred_port).clone()
    }

    pub fn set_preferred_port(&self, port_name: Option<String>) {
        *lock(&self.shared.preferred_port) = port_name;
    }

    fn current_link(&self) -> Option<Arc<LinkState>> {
        lock(&self.shared.connection).live_link()
    }

    /// Send a PING and block until READY or Pong arrives, or `timeout`
    /// elapses. Returns immediately if the handshake already happened.
    pub fn wait_for_ready(&self, timeout: Duration) -> bool {
        let Some(link) = self.current_link() else {
            log::warn!("Cannot wait for READY: not connected");
            return false;
        };

        log::info!("Waiting for READY signal (timeout {:?})", timeout);
        if let Err(e) = self.send_ping() {
            log::warn!("Failed to send PING: {}", e);
        }

        if link.wait_for_handshake(timeout) {
            log::info!("READY received");
            true
        } else {
            log::warn!("Timeout waiting for READY signal");
            false
        }
    }

    /// True once per connection, after the handshake: the caller that gets
    /// true runs the initial sync.
    pub fn claim_handshake(&self) -> bool {
        self.current_link()
            .map(|link| link.claim_handshake())
            .unwrap_or(false)
    }

    pub fn is_ready(&self) -> bool {
        self.current_link()
            .map(|link| link.handshake_received())
            .unwrap_or(false)
    }

    /// Returns false, forcing the fault path, when the connection believes
    /// itself open but the port handle reports closed.
    pub fn check_connection_health(&self) -> bool {
        let (generation, transport, link) = {
            let conn = lock(&self.shared.connection);
            if conn.phase != Phase::Open {
                return false;
            }
            (conn.generation, conn.live_transport(), conn.live_link())
        };

        let open = transport.as_ref().map(|t| lock(t).is_open()).unwrap_or(false);
        if !open {
            log::warn!("Port check failed - not open");
            self.shared.fault(Some(generation), "port reported closed");
            return false;
        }

        if let Some(age) = link.and_then(|l| l.last_message_age()) {
            if age > self.shared.settings.heartbeat_timeout() {
                log::debug!("No message from device for {:.1}s", age.as_secs_f64());
            }
        }
        true
    }

    pub fn get_connection_status(&self) -> ConnectionStatus {
        let port = self.preferred_port();
        let reconnect_active = self.is_reconnect_active();

        let conn = lock(&self.shared.connection);
        let (Some(link), Some(transport)) = (conn.live_link(), conn.live_transport()) else {
            let mut status = ConnectionStatus::disconnected(port, reconnect_active);
            status.state = conn.state();
            return status;
        };

        let port_open = lock(&transport).is_open();
        ConnectionStatus {
            connected: true,
            state: conn.state(),
            port,
            port_open,
            reader_alive: conn.reader.as_ref().map(|r| r.is_alive()).unwrap_or(false),
            reconnect_active,
            syncing: link.is_syncing(),
            handshake_complete: link.handshake_received(),
            last_message_age_seconds: link.last_message_age().map(|age| age.as_secs_f64()),
            connected_since: conn.connected_since,
            metrics: link.metrics(),
        }
    }

    /// Write one frame. Fails with `NotConnected` when no connection is open;
    /// a write error is returned without tearing the connection down.
    pub fn send_message(&self, frame: &str) -> Result<()> {
        let transport = lock(&self.shared.connection)
            .live_transport()
            .ok_or(DeviceError::NotConnected)?;

        let result = lock(&transport).write_line(frame);
        result.map_err(|e| {
            log::warn!("Send error: {}", e);
            DeviceError::from(e)
        })
    }

    pub fn send_button_config(&self, mode: usize, button: usize, config: &ButtonConfig) -> Result<()> {
        self.send_message(&protocol::button_config(
            mode,
            button,
            config.wire_hotkey(),
            &config.label,
        ))
    }

    pub fn send_mode_switch(&self, mode: usize) -> Result<()> {
        self.send_message(&protocol::mode_switch(mode))
    }

    pub fn send_mode_count(&self, count: usize) -> Result<()> {
        self.send_message(&protocol::mode_count(count))
    }

    pub fn send_mode_name(&self, mode: usize, name: &str) -> Result<()> {
        self.send_message(&protocol::mode_name(mode, name))
    }

    pub fn send_slider_config(&self, slider: usize, apps: &[String]) -> Result<()> {
        self.send_message(&protocol::slider_config(slider, apps))
    }

    pub fn send_clear_button(&self, mode: usize, button: usize) -> Result<()> {
        self.send_message(&protocol::clear_button(mode, button))
    }

    pub fn send_ping(&self) -> Result<()> {
        self.send_message(&protocol::ping())
    }

    pub fn send_now_playing(&self, artist: &str, title: &str) -> Result<()> {
        self.send_message(&protocol::now_playing(artist, title))
    }

    /// Push the whole configuration. Returns the number of mode names and
    /// button configs sent, or 0 if the transaction was aborted.
    pub fn sync_all_configs(&self, source: &dyn ConfigSource, slider_apps: &[Vec<String>]) -> usize {
        let Some(link) = self.current_link() else {
            log::error!("Cannot sync: not connected");
            return 0;
        };

        link.set_syncing(true);
        let result = SyncEngine::new(self, self.shared.settings.sync_pacing()).run(source, slider_apps);
        link.set_syncing(false);

        match result {
            Ok(report) => report.configs(),
            Err(e) => {
                log::error!("{}", e);
                0
            }
        }
    }

    /// Start the reconnect loop on `port_name`. No-op if it is already
    /// running.
    pub fn start_auto_reconnect(&self, port_name: &str) -> Result<()> {
        let mut reconnect = lock(&self.shared.reconnect);
        if reconnect.as_ref().map(|r| r.is_running()).unwrap_or(false) {
            log::warn!("Auto-reconnect already running");
            return Ok(());
        }

        *lock(&self.shared.preferred_port) = Some(port_name.to_string());
        let target = Arc::new(ManagerTarget {
            shared: Arc::downgrade(&self.shared),
        });
        *reconnect = Some(AutoReconnect::start(
            self.shared.settings.reconnect_interval(),
            target,
        )?);
        log::info!("Auto-reconnect started for {}", port_name);
        Ok(())
    }

    pub fn stop_auto_reconnect(&self) {
        let handle = lock(&self.shared.reconnect).take();
        if let Some(handle) = handle {
            handle.stop(self.shared.settings.join_timeout());
        }
    }

    pub fn is_reconnect_active(&self) -> bool {
        lock(&self.shared.reconnect)
            .as_ref()
            .map(|r| r.is_running())
            .unwrap_or(false)
    }

    /// Register the callback for `kind`; replaces any earlier one.
    pub fn register_handler<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(&DeviceEvent) + Send + Sync + 'static,
    {
        self.handlers_mut().register(kind, handler);
    }

    /// Deliver every queued event to its handler, in arrival order. Events
    /// without a handler are dropped. Returns the number of events drained.
    pub fn drain_events(&self) -> usize {
        let events: Vec<DeviceEvent> = {
            let mut rx = lock(&self.shared.events_rx);
            std::iter::from_fn(|| rx.try_recv().ok()).collect()
        };

        for event in &events {
            let handler = self.handlers().get(event.kind());
            match handler {
                Some(handler) => handler(event),
                None => log::debug!("No handler for {}", event.kind().tag()),
            }
        }
        events.len()
    }

    fn handlers(&self) -> RwLockReadGuard<'_, MessageHandlers> {
        self.shared.handlers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn handlers_mut(&self) -> RwLockWriteGuard<'_, MessageHandlers> {
        self.shared.handlers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSink for DeviceManager {
    fn send_frame(&self, frame: &str) -> bool {
        self.send_message(frame).is_ok()
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}
