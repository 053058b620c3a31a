use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::device::LinkSettings;
use super::{
    ConfigError, Result, BUTTONS_PER_MODE, CONFIG_VERSION, DEFAULT_MODES, MASTER_SLIDER,
    MAX_MODES, MIN_MODES, NUM_SLIDERS,
};

/// What a button does on the host when pressed on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonAction {
    /// `+` separated key combination, e.g. `ctrl+shift+m`
    Hotkey(String),
    Launch { app_path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub label: String,
    pub action: ButtonAction,
}

impl ButtonConfig {
    pub fn hotkey(icon: impl Into<String>, label: impl Into<String>, hotkey: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            label: label.into(),
            action: ButtonAction::Hotkey(hotkey.into()),
        }
    }

    pub fn launch(icon: impl Into<String>, label: impl Into<String>, app_path: impl Into<String>) -> Self {
        Self {
            icon: icon.into(),
            label: label.into(),
            action: ButtonAction::Launch {
                app_path: app_path.into(),
            },
        }
    }

    /// Hotkey field of the `BTN` frame; launch buttons send an empty one.
    pub fn wire_hotkey(&self) -> &str {
        match &self.action {
            ButtonAction::Hotkey(hotkey) => hotkey,
            ButtonAction::Launch { .. } => "",
        }
    }

    /// Lower-cased key names of a hotkey action; `None` for launch actions
    /// and empty hotkeys.
    pub fn hotkey_keys(&self) -> Option<Vec<String>> {
        match &self.action {
            ButtonAction::Hotkey(hotkey) if !hotkey.trim().is_empty() => Some(
                hotkey
                    .to_lowercase()
                    .split('+')
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }
}

pub type ButtonRow = [Option<ButtonConfig>; BUTTONS_PER_MODE];

/// Button configs indexed by `(mode, button)`. Rows are created on demand;
/// `None` marks an unset button.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonTable {
    rows: Vec<ButtonRow>,
}

impl ButtonTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, mode: usize, button: usize) -> Option<&ButtonConfig> {
        self.rows.get(mode)?.get(button)?.as_ref()
    }

    pub fn set(&mut self, mode: usize, button: usize, config: ButtonConfig) -> Result<()> {
        check_index("mode", mode, MAX_MODES)?;
        check_index("button", button, BUTTONS_PER_MODE)?;
        if self.rows.len() <= mode {
            self.rows.resize_with(mode + 1, Default::default);
        }
        self.rows[mode][button] = Some(config);
        Ok(())
    }

    /// Remove a config, returning it if one was set.
    pub fn clear(&mut self, mode: usize, button: usize) -> Option<ButtonConfig> {
        self.rows.get_mut(mode)?.get_mut(button)?.take()
    }

    /// Every set button as `(mode, button, config)`, in table order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &ButtonConfig)> {
        self.rows.iter().enumerate().flat_map(|(mode, row)| {
            row.iter()
                .enumerate()
                .filter_map(move |(button, config)| config.as_ref().map(|c| (mode, button, c)))
        })
    }

    pub fn mode_has_buttons(&self, mode: usize) -> bool {
        self.rows
            .get(mode)
            .map(|row| row.iter().any(Option::is_some))
            .unwrap_or(false)
    }

    /// Drop a whole mode; later modes move down by one.
    pub fn remove_mode(&mut self, mode: usize) {
        if mode < self.rows.len() {
            self.rows.remove(mode);
        }
    }

    /// Drop rows past `modes`.
    pub fn truncate(&mut self, modes: usize) {
        self.rows.truncate(modes);
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// The persisted configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub num_modes: usize,
    /// Only modes with a custom name are present.
    pub mode_names: BTreeMap<usize, String>,
    pub buttons: ButtonTable,
    /// Process names per slider. The master slider's list stays empty.
    pub sliders: [Vec<String>; NUM_SLIDERS],
    pub slider_names: BTreeMap<usize, String>,
    pub preferred_port: Option<String>,
    /// Process name to display name, e.g. `gw2.exe` to `Guild Wars 2`.
    pub app_name_mappings: BTreeMap<String, String>,
    pub link: LinkSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            num_modes: DEFAULT_MODES,
            mode_names: BTreeMap::new(),
            buttons: ButtonTable::new(),
            sliders: Default::default(),
            slider_names: BTreeMap::new(),
            preferred_port: None,
            app_name_mappings: BTreeMap::new(),
            link: LinkSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn clamp_modes(count: usize) -> usize {
        count.clamp(MIN_MODES, MAX_MODES)
    }

    pub fn mode_name(&self, mode: usize) -> String {
        self.mode_names
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| format!("Mode {}", mode + 1))
    }

    pub fn slider_name(&self, slider: usize) -> String {
        if let Some(name) = self.slider_names.get(&slider) {
            return name.clone();
        }
        if slider == MASTER_SLIDER {
            "Master Volume".to_string()
        } else {
            format!("Slider {}", slider + 1)
        }
    }

    pub fn app_display_name(&self, process: &str) -> String {
        self.app_name_mappings
            .get(process)
            .cloned()
            .unwrap_or_else(|| process.to_string())
    }

    /// Bring a freshly deserialized document back within its invariants.
    pub fn normalize(&mut self) {
        self.version = CONFIG_VERSION;
        self.num_modes = Self::clamp_modes(self.num_modes);
        self.buttons.truncate(MAX_MODES);
        self.sliders[MASTER_SLIDER].clear();
        if self.preferred_port.as_deref().map(str::is_empty).unwrap_or(false) {
            self.preferred_port = None;
        }
    }
}

pub(crate) fn check_index(what: &'static str, index: usize, limit: usize) -> Result<()> {
    if index < limit {
        Ok(())
    } else {
        Err(ConfigError::InvalidIndex { what, index, limit })
    }
}
