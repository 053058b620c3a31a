use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

use crate::serial::protocol::{parse_device_line, DeviceMessage};
use super::types::{DeviceEvent, LinkState};

/// Parses one frame and routes it: handshake frames update the link state,
/// input frames become [`DeviceEvent`]s on the application queue, the rest
/// is logged.
#[derive(Clone)]
pub struct LineDispatcher {
    link: Arc<LinkState>,
    events_tx: UnboundedSender<DeviceEvent>,
}

impl LineDispatcher {
    pub fn new(link: Arc<LinkState>, events_tx: UnboundedSender<DeviceEvent>) -> Self {
        Self { link, events_tx }
    }

    pub fn link(&self) -> &Arc<LinkState> {
        &self.link
    }

    /// Handle one complete, trimmed, non-empty frame. Returns false when the
    /// frame was malformed and dropped.
    pub fn handle_line(&self, line: &str) -> bool {
        log::debug!("Received: {}", line);

        let message = match parse_device_line(line) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Dropping frame '{}': {}", line, e);
                self.link.record(|m| {
                    m.malformed_frames += 1;
                    m.last_error = Some(e.to_string());
                });
                return false;
            }
        };

        self.link.touch();
        self.link.record(|m| m.frames_received += 1);

        match message {
            DeviceMessage::ButtonPress { mode, button } => {
                self.emit(DeviceEvent::ButtonPress { mode, button })
            }
            DeviceMessage::SliderChange { slider, value } => {
                self.emit(DeviceEvent::SliderChange { slider, value })
            }
            DeviceMessage::ModeChange { mode } => self.emit(DeviceEvent::ModeChange { mode }),
            DeviceMessage::Ready { info } => {
                if self.link.complete_handshake() {
                    log::info!("Device ready: {}", info);
                    self.emit(DeviceEvent::Ready { info });
                } else {
                    log::info!("Device ready: {} (handshake already received)", info);
                    self.link.record(|m| m.repeated_handshakes += 1);
                }
            }
            DeviceMessage::Pong => {
                if self.link.complete_handshake() {
                    log::info!("Pong received, accepting it as ready signal (device was already running)");
                    self.emit(DeviceEvent::Ready { info: String::new() });
                } else {
                    log::debug!("Pong received");
                }
            }
            DeviceMessage::Ack { info } => log::debug!("ACK: {}", info),
            DeviceMessage::DeviceError { info } => log::warn!("Device reported error: {}", info),
            DeviceMessage::Info { line } => log::info!("Device: {}", line),
        }
        true
    }

    fn emit(&self, event: DeviceEvent) {
        if self.events_tx.send(event).is_err() {
            log::debug!("Event queue closed, dropping event");
        }
    }
}
