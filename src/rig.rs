//! The camera rig: mode state machine plus camera selection.
//!
//! The peripheral cannot be reconfigured while running, so `switch_mode`
//! always goes through a full stop before touching the configuration. The
//! rig is the sole owner of the peripheral handle and the mux selector;
//! concurrent access is serialized one level up, by `gate`.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::frame::Frame;
use crate::mux::{CameraId, Selector};
use crate::peripheral::{Peripheral, STILL_GEOMETRY, VIDEO_GEOMETRY};

/// Current peripheral configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureMode {
    None,
    Video,
    Still,
}

/// Hardware settle delays. The defaults are what the sensors need; tests run
/// with `SettleDelays::none()`.
#[derive(Clone, Copy, Debug)]
pub struct SettleDelays {
    /// After stopping the peripheral, before reconfiguring.
    pub mode_stop: Duration,
    /// After starting the peripheral, for sensor stabilization.
    pub mode_start: Duration,
    /// After a multiplexer selection change.
    pub select: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            mode_stop: Duration::from_millis(200),
            mode_start: Duration::from_millis(500),
            select: crate::mux::SELECT_SETTLE,
        }
    }
}

impl SettleDelays {
    pub fn none() -> Self {
        Self {
            mode_stop: Duration::ZERO,
            mode_start: Duration::ZERO,
            select: Duration::ZERO,
        }
    }
}

/// The single shared camera resource: peripheral handle, mux selector, and
/// the mode/active state. Constructed by an explicit startup call; there is
/// no process-global instance.
pub struct CameraRig {
    peripheral: Box<dyn Peripheral>,
    selector: Selector,
    settle: SettleDelays,
    active: bool,
    mode: CaptureMode,
}

impl CameraRig {
    pub fn new(
        peripheral: Box<dyn Peripheral>,
        selector: Selector,
        settle: SettleDelays,
    ) -> Self {
        Self {
            peripheral,
            selector,
            settle,
            active: false,
            mode: CaptureMode::None,
        }
    }

    /// One-time startup: route camera A and enter VIDEO mode for streaming.
    pub fn startup(&mut self) -> Result<()> {
        self.select_camera(CameraId::A)?;
        self.switch_mode(CaptureMode::Video)
            .context("initial switch to video mode")?;
        log::info!("camera rig initialized in video mode");
        Ok(())
    }

    /// Route the named sensor to the peripheral.
    pub fn select_camera(&mut self, id: CameraId) -> Result<()> {
        self.selector.select(id)
    }

    /// Mode transition. Invariant: the peripheral is observed inactive
    /// immediately before any configure step, from any prior state.
    pub fn switch_mode(&mut self, target: CaptureMode) -> Result<()> {
        if self.active {
            self.peripheral.stop().context("stop peripheral")?;
            self.active = false;
            std::thread::sleep(self.settle.mode_stop);
        }
        self.mode = CaptureMode::None;

        let geometry = match target {
            CaptureMode::None => return Ok(()),
            CaptureMode::Video => VIDEO_GEOMETRY,
            CaptureMode::Still => STILL_GEOMETRY,
        };

        self.peripheral
            .configure(geometry)
            .with_context(|| format!("configure peripheral for {target:?}"))?;
        self.peripheral.start().context("start peripheral")?;
        self.active = true;
        self.mode = target;
        std::thread::sleep(self.settle.mode_start);
        log::debug!("peripheral switched to {target:?} mode");
        Ok(())
    }

    /// Capture one frame in the current mode.
    pub fn capture_frame(&mut self) -> Result<Frame> {
        if !self.active {
            bail!("capture requested while peripheral is inactive ({:?})", self.mode);
        }
        self.peripheral.capture()
    }

    /// Stop the peripheral and leave the rig in NONE mode.
    pub fn shutdown(&mut self) -> Result<()> {
        self.switch_mode(CaptureMode::None)
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn selected_camera(&self) -> Option<CameraId> {
        self.selector.selected()
    }
}
