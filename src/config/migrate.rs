//! Versioned loading of configuration documents.
//!
//! Version 1 is the flat key/value layout written by earlier releases:
//! `mode_{m}_btn_{b}` button objects, `mode_{m}_name`, `slider_{i}` as a
//! string or list, `slider_{i}_name`, `num_modes`, `preferred_port` and
//! `app_name_mappings`. It carries no `version` field.

use serde_json::{Map, Value};

use super::models::{AppConfig, ButtonConfig};
use super::{Result, BUTTONS_PER_MODE, CONFIG_VERSION, MASTER_SLIDER, MAX_MODES, NUM_SLIDERS};

const LEGACY_MASTER_SLIDER: &str = "Master Volume";

/// Parse a document of any known version. The flag is true when the
/// document was migrated and should be written back.
pub fn parse_document(text: &str) -> Result<(AppConfig, bool)> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("version").and_then(Value::as_u64) {
        Some(version) => {
            if version > u64::from(CONFIG_VERSION) {
                log::warn!(
                    "Config version {} is newer than supported version {}, loading what is understood",
                    version,
                    CONFIG_VERSION
                );
            }
            let mut config: AppConfig = serde_json::from_value(value)?;
            config.normalize();
            Ok((config, false))
        }
        None => {
            let map = match value {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            log::info!("Migrating legacy configuration ({} keys)", map.len());
            Ok((migrate_legacy(&map), true))
        }
    }
}

pub fn migrate_legacy(map: &Map<String, Value>) -> AppConfig {
    let mut config = AppConfig::default();

    if let Some(count) = map.get("num_modes").and_then(Value::as_u64) {
        config.num_modes = AppConfig::clamp_modes(count as usize);
    }

    for (key, value) in map {
        if let Some((mode, button)) = parse_button_key(key) {
            match legacy_button(value) {
                Some(button_config) => {
                    if let Err(e) = config.buttons.set(mode, button, button_config) {
                        log::warn!("Skipping legacy key {}: {}", key, e);
                    }
                }
                None => log::warn!("Skipping legacy key {}: not a button object", key),
            }
        } else if let Some(mode) = indexed_key(key, "mode_", "_name") {
            if let (Some(name), true) = (value.as_str(), mode < MAX_MODES) {
                config.mode_names.insert(mode, name.to_string());
            }
        } else if let Some(slider) = indexed_key(key, "slider_", "_name") {
            if let (Some(name), true) = (value.as_str(), slider < NUM_SLIDERS) {
                config.slider_names.insert(slider, name.to_string());
            }
        } else if let Some(slider) = indexed_key(key, "slider_", "") {
            if slider < NUM_SLIDERS && slider != MASTER_SLIDER {
                config.sliders[slider] = legacy_slider_apps(value);
            }
        }
    }

    if let Some(port) = map.get("preferred_port").and_then(Value::as_str) {
        config.preferred_port = Some(port.to_string());
    }

    if let Some(Value::Object(mappings)) = map.get("app_name_mappings") {
        for (process, display) in mappings {
            if let Some(display) = display.as_str() {
                config.app_name_mappings.insert(process.clone(), display.to_string());
            }
        }
    }

    config.normalize();
    config
}

/// `mode_{m}_btn_{b}`
fn parse_button_key(key: &str) -> Option<(usize, usize)> {
    let rest = key.strip_prefix("mode_")?;
    let (mode, button) = rest.split_once("_btn_")?;
    let mode: usize = mode.parse().ok()?;
    let button: usize = button.parse().ok()?;
    if mode >= MAX_MODES || button >= BUTTONS_PER_MODE {
        return None;
    }
    Some((mode, button))
}

/// `{prefix}{n}{suffix}` with a purely numeric `n`.
fn indexed_key(key: &str, prefix: &str, suffix: &str) -> Option<usize> {
    key.strip_prefix(prefix)?.strip_suffix(suffix)?.parse().ok()
}

fn legacy_button(value: &Value) -> Option<ButtonConfig> {
    let object = value.as_object()?;
    let text = |field: &str| {
        object
            .get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let app_path = text("app_path");
    Some(if app_path.is_empty() {
        ButtonConfig::hotkey(text("icon"), text("label"), text("hotkey"))
    } else {
        ButtonConfig::launch(text("icon"), text("label"), app_path)
    })
}

/// A single string or a list of strings; the old master-volume marker
/// string means no apps.
fn legacy_slider_apps(value: &Value) -> Vec<String> {
    match value {
        Value::String(app) if app.is_empty() || app == LEGACY_MASTER_SLIDER => Vec::new(),
        Value::String(app) => vec![app.clone()],
        Value::Array(apps) => apps
            .iter()
            .filter_map(Value::as_str)
            .filter(|app| !app.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
