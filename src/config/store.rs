use std::path::{Path, PathBuf};

use crate::device::{ConfigSource, LinkSettings};
use super::migrate::parse_document;
use super::models::{check_index, AppConfig, ButtonConfig};
use super::{
    ConfigError, Result, BUTTONS_PER_MODE, MASTER_SLIDER, MAX_MODES, MAX_MODE_NAME_LEN, MIN_MODES,
};

const APP_DIR: &str = "macropad-bridge";

/// The configuration document plus the file it lives in. Every mutation is
/// written to disk before returning.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    config: AppConfig,
}

impl ConfigStore {
    /// `<config dir>/macropad-bridge/config.json`
    pub fn default_path() -> PathBuf {
        config_dir().join(APP_DIR).join("config.json")
    }

    /// Load from `path`. A missing or unreadable file yields defaults; a
    /// legacy document is migrated and written back.
    pub fn load_from(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match std::fs::read_to_string(&path) {
            Ok(text) => match parse_document(&text) {
                Ok((config, migrated)) => {
                    log::info!("Loaded configuration from {}", path.display());
                    if migrated {
                        let store = Self { path, config };
                        match store.save() {
                            Ok(()) => log::info!("Migrated configuration written to {}", store.path.display()),
                            Err(e) => log::warn!("Failed to write migrated configuration: {}", e),
                        }
                        return store;
                    }
                    config
                }
                Err(e) => {
                    log::error!("Error loading config from {}: {}", path.display(), e);
                    AppConfig::default()
                }
            },
            Err(_) => {
                log::debug!("No config file at {}, using defaults", path.display());
                AppConfig::default()
            }
        };
        Self { path, config }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn save(&self) -> Result<()> {
        write_document(&self.path, &self.config)?;
        log::debug!("Config saved");
        Ok(())
    }

    pub fn export_to(&self, path: &Path) -> Result<()> {
        write_document(path, &self.config)?;
        log::info!("Exported configuration to {}", path.display());
        Ok(())
    }

    /// Replace the whole configuration with the document at `path`. The
    /// current configuration is kept if the file cannot be read or parsed.
    pub fn import_from(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        let (config, _) = parse_document(&text)?;
        self.config = config;
        self.save()?;
        log::info!("Imported configuration from {}", path.display());
        Ok(())
    }

    pub fn num_modes(&self) -> usize {
        self.config.num_modes
    }

    /// Set the mode count, clamped to the allowed range. Returns the value
    /// stored.
    pub fn set_num_modes(&mut self, count: usize) -> Result<usize> {
        self.config.num_modes = AppConfig::clamp_modes(count);
        self.save()?;
        log::info!("Number of modes set to {}", self.config.num_modes);
        Ok(self.config.num_modes)
    }

    /// Append a mode. Returns the new mode count.
    pub fn add_mode(&mut self) -> Result<usize> {
        if self.config.num_modes >= MAX_MODES {
            return Err(mode_limit());
        }
        self.set_num_modes(self.config.num_modes + 1)
    }

    /// Delete `mode` with its buttons and name; later modes move down one.
    pub fn remove_mode(&mut self, mode: usize) -> Result<usize> {
        check_index("mode", mode, self.config.num_modes)?;
        if self.config.num_modes <= MIN_MODES {
            return Err(mode_limit());
        }

        self.config.buttons.remove_mode(mode);
        self.config.mode_names = std::mem::take(&mut self.config.mode_names)
            .into_iter()
            .filter(|(m, _)| *m != mode)
            .map(|(m, name)| if m > mode { (m - 1, name) } else { (m, name) })
            .collect();
        self.config.num_modes -= 1;
        self.save()?;
        log::info!("Removed mode {} and shifted remaining modes", mode + 1);
        Ok(self.config.num_modes)
    }

    pub fn mode_name(&self, mode: usize) -> String {
        self.config.mode_name(mode)
    }

    /// Rename `mode`. The name is trimmed and must be 1 to 20 characters.
    /// Returns the stored name.
    pub fn set_mode_name(&mut self, mode: usize, name: &str) -> Result<String> {
        check_index("mode", mode, self.config.num_modes)?;
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_MODE_NAME_LEN {
            return Err(ConfigError::InvalidName(format!(
                "mode names must be 1 to {} characters, got '{}'",
                MAX_MODE_NAME_LEN, name
            )));
        }
        self.config.mode_names.insert(mode, name.to_string());
        self.save()?;
        log::info!("Mode {} renamed to '{}'", mode, name);
        Ok(name.to_string())
    }

    pub fn button_config(&self, mode: usize, button: usize) -> Option<&ButtonConfig> {
        self.config.buttons.get(mode, button)
    }

    pub fn set_button_config(&mut self, mode: usize, button: usize, config: ButtonConfig) -> Result<()> {
        check_index("mode", mode, self.config.num_modes)?;
        self.config.buttons.set(mode, button, config)?;
        self.save()
    }

    /// Returns whether a config was removed.
    pub fn clear_button_config(&mut self, mode: usize, button: usize) -> Result<bool> {
        check_index("button", button, BUTTONS_PER_MODE)?;
        if self.config.buttons.clear(mode, button).is_none() {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn slider_apps(&self, slider: usize) -> &[String] {
        self.config
            .sliders
            .get(slider)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// App lists of all sliders, indexed by slider.
    pub fn slider_assignments(&self) -> Vec<Vec<String>> {
        self.config.sliders.to_vec()
    }

    pub fn set_slider_apps(&mut self, slider: usize, apps: Vec<String>) -> Result<()> {
        check_index("slider", slider, MASTER_SLIDER)?;
        let apps: Vec<String> = apps.into_iter().filter(|app| !app.trim().is_empty()).collect();
        log::info!("Slider {} configured with {} apps", slider, apps.len());
        self.config.sliders[slider] = apps;
        self.save()
    }

    pub fn slider_name(&self, slider: usize) -> String {
        self.config.slider_name(slider)
    }

    pub fn preferred_port(&self) -> Option<&str> {
        self.config.preferred_port.as_deref()
    }

    pub fn set_preferred_port(&mut self, port: &str) -> Result<()> {
        self.config.preferred_port = Some(port.to_string()).filter(|p| !p.is_empty());
        self.save()?;
        log::info!("Preferred port set to {}", port);
        Ok(())
    }

    pub fn app_display_name(&self, process: &str) -> String {
        self.config.app_display_name(process)
    }

    pub fn set_app_display_name(&mut self, process: &str, display: &str) -> Result<()> {
        self.config
            .app_name_mappings
            .insert(process.to_string(), display.to_string());
        self.save()
    }

    pub fn link_settings(&self) -> &LinkSettings {
        &self.config.link
    }
}

impl ConfigSource for ConfigStore {
    fn num_modes(&self) -> usize {
        self.config.num_modes
    }

    fn mode_name(&self, mode: usize) -> String {
        self.config.mode_name(mode)
    }

    fn button_configs(&self) -> Vec<(usize, usize, ButtonConfig)> {
        self.config
            .buttons
            .iter()
            .filter(|(mode, _, _)| *mode < self.config.num_modes)
            .map(|(mode, button, config)| (mode, button, config.clone()))
            .collect()
    }
}

fn mode_limit() -> ConfigError {
    ConfigError::ModeLimit {
        min: MIN_MODES,
        max: MAX_MODES,
    }
}

fn write_document(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Platform configuration directory (`%APPDATA%`, `~/.config`,
/// `~/Library/Application Support`), or the working directory when the
/// platform has none.
pub fn config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
}
