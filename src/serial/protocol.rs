//! Line protocol spoken with the macro-pad firmware.
//!
//! Host to device frames are produced by the encoder functions below, one per
//! command, without the trailing newline (the transport adds it). Device to
//! host frames are `TYPE` or `TYPE:payload` and are parsed by
//! [`parse_device_line`].

use serde::{Deserialize, Serialize};

use super::{Result, SerialError};

pub const BTN_PRESS: &str = "BTN_PRESS";
pub const SLIDER_CHANGE: &str = "SLIDER_CHANGE";
pub const MODE_CHANGE: &str = "MODE_CHANGE";
pub const READY: &str = "READY";
pub const PONG: &str = "Pong";

/// Sent in a `SLIDER` frame when a slider has no applications.
pub const NO_APPS: &str = "NONE";

pub fn button_config(mode: usize, button: usize, hotkey: &str, label: &str) -> String {
    format!("BTN:{}:{}:{}:{}", mode, button, hotkey, label)
}

pub fn mode_switch(mode: usize) -> String {
    format!("MODE:{}", mode)
}

pub fn mode_count(count: usize) -> String {
    format!("MODE_COUNT:{}", count)
}

pub fn mode_name(mode: usize, name: &str) -> String {
    format!("MODE_NAME:{}:{}", mode, name)
}

pub fn slider_config(slider: usize, apps: &[String]) -> String {
    let apps = if apps.is_empty() {
        NO_APPS.to_string()
    } else {
        apps.join(",")
    };
    format!("SLIDER:{}:{}", slider, apps)
}

pub fn clear_button(mode: usize, button: usize) -> String {
    format!("CLEAR:{}:{}", mode, button)
}

pub fn sync_start() -> String {
    "SYNC_START".to_string()
}

pub fn sync_end() -> String {
    "SYNC_END".to_string()
}

pub fn ping() -> String {
    "PING".to_string()
}

/// Artist and title are `|` separated since either may contain `:`.
pub fn now_playing(artist: &str, title: &str) -> String {
    format!("SPOTIFY:{}|{}", artist, title)
}

/// A frame received from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMessage {
    ButtonPress { mode: u8, button: u8 },
    SliderChange { slider: u8, value: u8 },
    ModeChange { mode: u8 },
    Ready { info: String },
    Ack { info: String },
    DeviceError { info: String },
    Pong,
    /// Anything else; logged and otherwise ignored.
    Info { line: String },
}

/// Split a frame into its type tag and payload.
///
/// The tag is everything before the first `:`; a frame without `:` is all
/// tag with an empty payload.
pub fn split_frame(line: &str) -> (&str, &str) {
    match line.split_once(':') {
        Some((tag, payload)) => (tag, payload),
        None => (line, ""),
    }
}

pub fn parse_device_line(line: &str) -> Result<DeviceMessage> {
    if line == PONG {
        return Ok(DeviceMessage::Pong);
    }

    let (tag, payload) = split_frame(line);
    let message = match tag {
        BTN_PRESS => {
            let [mode, button] = int_fields::<2>(tag, payload)?;
            DeviceMessage::ButtonPress { mode, button }
        }
        SLIDER_CHANGE => {
            let [slider, value] = int_fields::<2>(tag, payload)?;
            if value > 100 {
                return Err(SerialError::ProtocolError(format!(
                    "{} value {} out of range 0-100",
                    tag, value
                )));
            }
            DeviceMessage::SliderChange { slider, value }
        }
        MODE_CHANGE => {
            let [mode] = int_fields::<1>(tag, payload)?;
            DeviceMessage::ModeChange { mode }
        }
        READY => DeviceMessage::Ready { info: payload.to_string() },
        t if t.starts_with("ACK") => DeviceMessage::Ack { info: payload.to_string() },
        t if t.starts_with("ERROR") => DeviceMessage::DeviceError { info: payload.to_string() },
        _ => DeviceMessage::Info { line: line.to_string() },
    };
    Ok(message)
}

fn int_fields<const N: usize>(tag: &str, payload: &str) -> Result<[u8; N]> {
    let parts: Vec<&str> = payload.split(':').collect();
    if parts.len() != N {
        return Err(SerialError::ProtocolError(format!(
            "{} expects {} field(s), got {} in '{}'",
            tag,
            N,
            parts.len(),
            payload
        )));
    }

    let mut fields = [0u8; N];
    for (slot, part) in fields.iter_mut().zip(parts) {
        *slot = part.trim().parse().map_err(|_| {
            SerialError::ProtocolError(format!("{}: invalid number '{}'", tag, part))
        })?;
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_every_command() {
        assert_eq!(button_config(2, 5, "ctrl+shift+m", "Mute"), "BTN:2:5:ctrl+shift+m:Mute");
        assert_eq!(mode_switch(3), "MODE:3");
        assert_eq!(mode_count(4), "MODE_COUNT:4");
        assert_eq!(mode_name(1, "Gaming"), "MODE_NAME:1:Gaming");
        assert_eq!(clear_button(0, 8), "CLEAR:0:8");
        assert_eq!(sync_start(), "SYNC_START");
        assert_eq!(sync_end(), "SYNC_END");
        assert_eq!(ping(), "PING");
        assert_eq!(now_playing("AC/DC", "T.N.T: Live"), "SPOTIFY:AC/DC|T.N.T: Live");
    }

    #[test]
    fn slider_without_apps_sends_none() {
        assert_eq!(slider_config(1, &[]), "SLIDER:1:NONE");
        let apps = vec!["Discord.exe".to_string(), "chrome.exe".to_string()];
        assert_eq!(slider_config(0, &apps), "SLIDER:0:Discord.exe,chrome.exe");
    }

    #[test]
    fn splits_on_first_colon_only() {
        assert_eq!(split_frame("READY:v1.2:build7"), ("READY", "v1.2:build7"));
        assert_eq!(split_frame("Pong"), ("Pong", ""));
    }

    #[test]
    fn parses_device_frames() {
        assert_eq!(
            parse_device_line("BTN_PRESS:2:5").unwrap(),
            DeviceMessage::ButtonPress { mode: 2, button: 5 }
        );
        assert_eq!(
            parse_device_line("SLIDER_CHANGE:3:100").unwrap(),
            DeviceMessage::SliderChange { slider: 3, value: 100 }
        );
        assert_eq!(parse_device_line("MODE_CHANGE:1").unwrap(), DeviceMessage::ModeChange { mode: 1 });
        assert_eq!(
            parse_device_line("READY:Pico v2").unwrap(),
            DeviceMessage::Ready { info: "Pico v2".into() }
        );
        assert_eq!(
            parse_device_line("ACK_BTN:0:1").unwrap(),
            DeviceMessage::Ack { info: "0:1".into() }
        );
        assert_eq!(
            parse_device_line("ERROR:buffer full").unwrap(),
            DeviceMessage::DeviceError { info: "buffer full".into() }
        );
        assert_eq!(parse_device_line("Pong").unwrap(), DeviceMessage::Pong);
        assert_eq!(
            parse_device_line("READY").unwrap(),
            DeviceMessage::Ready { info: String::new() }
        );
        assert_eq!(
            parse_device_line("booting").unwrap(),
            DeviceMessage::Info { line: "booting".into() }
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(parse_device_line("SLIDER_CHANGE:abc:xyz").is_err());
        assert!(parse_device_line("BTN_PRESS:1").is_err());
        assert!(parse_device_line("BTN_PRESS:1:2:3").is_err());
        assert!(parse_device_line("MODE_CHANGE:").is_err());
        assert!(parse_device_line("SLIDER_CHANGE:0:101").is_err());
    }
}
