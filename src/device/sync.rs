//! Full configuration push after the handshake.
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ButtonConfig;
use crate::serial::protocol;
use super::{DeviceError, Result};

/// Read side of the configuration consumed during sync.
pub trait ConfigSource {
    fn num_modes(&self) -> usize;

    /// Display name of `mode`, falling back to the default name when unset.
    fn mode_name(&self, mode: usize) -> String;

    /// Every configured button as `(mode, button, config)`.
    fn button_configs(&self) -> Vec<(usize, usize, ButtonConfig)>;
}

/// Where the engine writes frames. Returns false when the frame could not
/// be sent.
pub trait FrameSink {
    fn send_frame(&self, frame: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPacing {
    /// Pause after SYNC_START for the device to acknowledge
    pub start_delay: Duration,
    /// Pause after every following frame
    pub frame_delay: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub mode_names: usize,
    pub buttons: usize,
    pub sliders: usize,
}

impl SyncReport {
    /// Mode names plus button configs; sliders are reported separately.
    pub fn configs(&self) -> usize {
        self.mode_names + self.buttons
    }
}

pub struct SyncEngine<'a> {
    sink: &'a dyn FrameSink,
    pacing: SyncPacing,
}

impl<'a> SyncEngine<'a> {
    pub fn new(sink: &'a dyn FrameSink, pacing: SyncPacing) -> Self {
        Self { sink, pacing }
    }

    /// Push modes, buttons and sliders between SYNC_START and SYNC_END.
    ///
    /// Failing to send SYNC_START, MODE_COUNT or SYNC_END aborts the whole
    /// transaction; a failed mode name, button or slider frame is skipped
    /// and not counted.
    pub fn run(&self, source: &dyn ConfigSource, slider_apps: &[Vec<String>]) -> Result<SyncReport> {
        log::info!("Starting full synchronization...");
        let mut report = SyncReport::default();

        if !self.sink.send_frame(&protocol::sync_start()) {
            return Err(DeviceError::SyncAborted("SYNC_START"));
        }
        std::thread::sleep(self.pacing.start_delay);

        let num_modes = source.num_modes();
        if !self.sink.send_frame(&protocol::mode_count(num_modes)) {
            return Err(DeviceError::SyncAborted("MODE_COUNT"));
        }
        log::debug!("Sent MODE_COUNT: {}", num_modes);
        self.pause();

        for mode in 0..num_modes {
            let name = source.mode_name(mode);
            if self.sink.send_frame(&protocol::mode_name(mode, &name)) {
                report.mode_names += 1;
            }
            self.pause();
        }

        for (mode, button, config) in source.button_configs() {
            let frame = protocol::button_config(mode, button, config.wire_hotkey(), &config.label);
            if self.sink.send_frame(&frame) {
                report.buttons += 1;
            }
            self.pause();
        }

        for (slider, apps) in slider_apps.iter().enumerate() {
            if apps.is_empty() {
                continue;
            }
            if self.sink.send_frame(&protocol::slider_config(slider, apps)) {
                log::debug!("Sent SLIDER {}: {} apps", slider, apps.len());
                report.sliders += 1;
            }
            self.pause();
        }

        if !self.sink.send_frame(&protocol::sync_end()) {
            return Err(DeviceError::SyncAborted("SYNC_END"));
        }

        log::info!(
            "Sync complete: {} configs + {} sliders",
            report.configs(),
            report.sliders
        );
        Ok(report)
    }

    fn pause(&self) {
        if !self.pacing.frame_delay.is_zero() {
            std::thread::sleep(self.pacing.frame_delay);
        }
    }
}
