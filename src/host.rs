//! OS-side collaborators invoked on device input. Real backends (key
//! injection, process launching, audio sessions) live outside this crate;
//! [`LoggingHost`] only records what would happen.

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Application not found: {0}")]
    AppNotFound(String),

    #[error("Action failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, HostError>;

pub trait ActionRunner: Send + Sync {
    /// Press and release `keys` together, e.g. `["ctrl", "shift", "m"]`.
    fn send_hotkey(&self, keys: &[String]) -> Result<()>;

    fn launch(&self, app_path: &str) -> Result<()>;
}

pub trait AudioControl: Send + Sync {
    /// `volume` is 0.0 to 1.0.
    fn set_app_volume(&self, process: &str, volume: f32) -> Result<()>;

    fn set_master_volume(&self, volume: f32) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl ActionRunner for LoggingHost {
    fn send_hotkey(&self, keys: &[String]) -> Result<()> {
        log::info!("Hotkey: {}", keys.join("+"));
        Ok(())
    }

    fn launch(&self, app_path: &str) -> Result<()> {
        log::info!("Launch: {}", app_path);
        Ok(())
    }
}

impl AudioControl for LoggingHost {
    fn set_app_volume(&self, process: &str, volume: f32) -> Result<()> {
        log::info!("Volume for {} set to {:.0}%", process, volume * 100.0);
        Ok(())
    }

    fn set_master_volume(&self, volume: f32) -> Result<()> {
        log::info!("Master volume set to {:.0}%", volume * 100.0);
        Ok(())
    }
}
