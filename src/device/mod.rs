pub mod handlers;
pub mod manager;
pub mod models;
pub mod port_monitor;
pub mod sync;

pub use handlers::MessageHandlers;
pub use manager::DeviceManager;
pub use models::*;
pub use sync::{ConfigSource, FrameSink, SyncEngine, SyncReport};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not connected")]
    NotConnected,

    #[error("Device already connected")]
    AlreadyConnected,

    #[error("No READY from device within {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("Sync aborted: failed to send {0}")]
    SyncAborted(&'static str),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
