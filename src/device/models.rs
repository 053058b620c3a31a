use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serial::link::{LinkMetrics, ReaderConfig};
use super::sync::SyncPacing;

/// Connection state as seen from the application thread
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport open in progress
    Connecting,
    /// Port open, no READY/Pong yet
    AwaitingHandshake,
    Ready,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::AwaitingHandshake | ConnectionState::Ready)
    }
}

/// Snapshot returned by `DeviceManager::get_connection_status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    /// The preferred port, if one was ever set
    pub port: Option<String>,
    pub port_open: bool,
    pub reader_alive: bool,
    pub reconnect_active: bool,
    pub syncing: bool,
    pub handshake_complete: bool,
    pub last_message_age_seconds: Option<f64>,
    pub connected_since: Option<DateTime<Utc>>,
    pub metrics: LinkMetrics,
}

impl ConnectionStatus {
    pub fn disconnected(port: Option<String>, reconnect_active: bool) -> Self {
        Self {
            connected: false,
            state: ConnectionState::Disconnected,
            port,
            port_open: false,
            reader_alive: false,
            reconnect_active,
            syncing: false,
            handshake_complete: false,
            last_message_age_seconds: None,
            connected_since: None,
            metrics: LinkMetrics::default(),
        }
    }
}

/// Timing and threshold knobs of the serial link. Stored under the `link`
/// key of the configuration file; every field is optional there. The baud
/// rate is fixed at [`BAUD_RATE`](crate::serial::BAUD_RATE).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LinkSettings {
    pub poll_interval_ms: u64,
    pub error_threshold: u32,
    pub error_backoff_ms: u64,
    pub keepalive_enabled: bool,
    pub keepalive_interval_ms: u64,
    /// Only reported through the connection status, never enforced.
    pub heartbeat_timeout_ms: u64,
    pub reconnect_interval_ms: u64,
    pub join_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub sync_frame_delay_ms: u64,
    pub sync_start_delay_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            error_threshold: 5,
            error_backoff_ms: 100,
            keepalive_enabled: true,
            keepalive_interval_ms: 5_000,
            heartbeat_timeout_ms: 5_000,
            reconnect_interval_ms: 2_000,
            join_timeout_ms: 1_000,
            handshake_timeout_ms: 5_000,
            sync_frame_delay_ms: 50,
            sync_start_delay_ms: 100,
        }
    }
}

impl LinkSettings {
    /// Settings with every delay shortened, for driving the link in tests.
    pub fn fast() -> Self {
        Self {
            poll_interval_ms: 1,
            error_backoff_ms: 1,
            keepalive_enabled: false,
            reconnect_interval_ms: 20,
            join_timeout_ms: 500,
            handshake_timeout_ms: 1_000,
            sync_frame_delay_ms: 0,
            sync_start_delay_ms: 0,
            ..Self::default()
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_threshold: self.error_threshold,
            error_backoff: Duration::from_millis(self.error_backoff_ms),
            keepalive: self
                .keepalive_enabled
                .then(|| Duration::from_millis(self.keepalive_interval_ms)),
        }
    }

    pub fn sync_pacing(&self) -> SyncPacing {
        SyncPacing {
            start_delay: Duration::from_millis(self.sync_start_delay_ms),
            frame_delay: Duration::from_millis(self.sync_frame_delay_ms),
        }
    }
}
