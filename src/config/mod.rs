pub mod migrate;
pub mod models;
pub mod store;

pub use models::{AppConfig, ButtonAction, ButtonConfig, ButtonTable};
pub use store::{config_dir, ConfigStore};

pub const CONFIG_VERSION: u32 = 2;

pub const DEFAULT_MODES: usize = 4;
pub const MIN_MODES: usize = 1;
pub const MAX_MODES: usize = 10;
pub const BUTTONS_PER_MODE: usize = 9;

/// Sliders 0-2 drive application volume, slider 3 the master volume.
pub const NUM_SLIDERS: usize = 4;
pub const MASTER_SLIDER: usize = 3;

pub const MAX_MODE_NAME_LEN: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{what} {index} out of range (0..{limit})")]
    InvalidIndex {
        what: &'static str,
        index: usize,
        limit: usize,
    },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Mode count must stay within {min}..={max}")]
    ModeLimit { min: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
