//! Camera multiplexer selection.
//!
//! The rig wires four sensors to one camera interface through an I2C
//! multiplexer (address 0x70) plus three GPIO-driven enable lines. Selecting
//! a camera means writing that camera's pin pattern, switching the mux
//! channel, and waiting for the hardware to settle before trusting it.
//!
//! GPIO pin state and the I2C bus are single-writer resources coupled to the
//! peripheral configuration: selecting the wrong camera while a capture is in
//! flight yields a wrong-camera image rather than an error. All selection
//! therefore happens under the same exclusive access as the peripheral (see
//! `gate`).

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Header pins driving the multiplexer enable lines (physical numbering).
pub const GPIO_HEADER_PINS: [u8; 3] = [7, 11, 12];

/// I2C bus the multiplexer hangs off.
pub const MUX_I2C_BUS: u8 = 10;
/// Multiplexer device address.
pub const MUX_I2C_ADDR: u8 = 0x70;
/// Multiplexer channel control register.
pub const MUX_CONTROL_REG: u8 = 0x00;

/// Hardware settle time after a selection change.
pub const SELECT_SETTLE: Duration = Duration::from_millis(500);

/// Logical camera identity on the four-port multiplexer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CameraId {
    A,
    B,
    C,
    D,
}

impl CameraId {
    /// All cameras, in port order.
    pub const ALL: [CameraId; 4] = [CameraId::A, CameraId::B, CameraId::C, CameraId::D];

    /// Parse an id as it appears in URLs and config keys (`a`..`d`, any case).
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(CameraId::A),
            "b" => Ok(CameraId::B),
            "c" => Ok(CameraId::C),
            "d" => Ok(CameraId::D),
            other => Err(anyhow!("invalid camera id '{other}' (expected a, b, c or d)")),
        }
    }

    /// Lowercase form used in URLs and snapshot file names.
    pub fn lower(self) -> char {
        match self {
            CameraId::A => 'a',
            CameraId::B => 'b',
            CameraId::C => 'c',
            CameraId::D => 'd',
        }
    }

    /// Uppercase form used in session image file names.
    pub fn upper(self) -> char {
        self.lower().to_ascii_uppercase()
    }

    /// Static multiplexer routing for this camera.
    pub fn adapter_info(self) -> AdapterInfo {
        match self {
            CameraId::A => AdapterInfo {
                i2c_channel: 0x04,
                gpio_levels: [false, false, true],
            },
            CameraId::B => AdapterInfo {
                i2c_channel: 0x05,
                gpio_levels: [true, false, true],
            },
            CameraId::C => AdapterInfo {
                i2c_channel: 0x06,
                gpio_levels: [false, true, false],
            },
            CameraId::D => AdapterInfo {
                i2c_channel: 0x07,
                gpio_levels: [true, true, false],
            },
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lower())
    }
}

/// Per-camera multiplexer routing: the mux control register value and the
/// levels for the three enable pins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterInfo {
    pub i2c_channel: u8,
    pub gpio_levels: [bool; 3],
}

/// Access to the GPIO enable lines and the I2C multiplexer.
pub trait MuxBus: Send {
    fn write_gpio(&mut self, levels: [bool; 3]) -> Result<()>;
    fn write_i2c(&mut self, channel: u8) -> Result<()>;
}

/// Applies camera selections to a `MuxBus` with the required settle delay.
pub struct Selector {
    bus: Box<dyn MuxBus>,
    settle: Duration,
    selected: Option<CameraId>,
}

impl Selector {
    pub fn new(bus: Box<dyn MuxBus>, settle: Duration) -> Self {
        Self {
            bus,
            settle,
            selected: None,
        }
    }

    /// Route the named sensor to the camera interface.
    ///
    /// A no-op when the camera is already routed; the selection state is only
    /// mutated under the rig's exclusive access, so the cached value cannot go
    /// stale behind our back.
    pub fn select(&mut self, id: CameraId) -> Result<()> {
        if self.selected == Some(id) {
            return Ok(());
        }
        let info = id.adapter_info();
        self.bus
            .write_gpio(info.gpio_levels)
            .with_context(|| format!("set gpio pattern for camera {id}"))?;
        self.bus
            .write_i2c(info.i2c_channel)
            .with_context(|| format!("switch i2c mux to camera {id}"))?;
        std::thread::sleep(self.settle);
        self.selected = Some(id);
        log::info!("switched to camera {id}");
        Ok(())
    }

    pub fn selected(&self) -> Option<CameraId> {
        self.selected
    }
}

/// Open a mux bus: the stub for off-target runs, real GPIO otherwise.
pub fn open_bus(stub: bool) -> Result<Box<dyn MuxBus>> {
    if stub {
        return Ok(Box::new(StubMux::new()));
    }
    #[cfg(feature = "hw-mux")]
    {
        return Ok(Box::new(hw::HwMux::new()?));
    }
    #[cfg(not(feature = "hw-mux"))]
    anyhow::bail!("real mux requested but built without the hw-mux feature")
}

// ----------------------------------------------------------------------------
// Stub bus (off-target runs and tests)
// ----------------------------------------------------------------------------

/// A bus operation, as recorded by `StubMux`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MuxOp {
    Gpio([bool; 3]),
    I2c(u8),
}

/// In-memory mux bus. Records every write so tests can assert on side
/// effects (or their absence).
pub struct StubMux {
    ops: Arc<Mutex<Vec<MuxOp>>>,
}

impl StubMux {
    pub fn new() -> Self {
        Self {
            ops: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the recorded operations; grab it before boxing the
    /// bus into a `Selector`.
    pub fn ops(&self) -> Arc<Mutex<Vec<MuxOp>>> {
        Arc::clone(&self.ops)
    }
}

impl Default for StubMux {
    fn default() -> Self {
        Self::new()
    }
}

impl MuxBus for StubMux {
    fn write_gpio(&mut self, levels: [bool; 3]) -> Result<()> {
        self.ops
            .lock()
            .map_err(|_| anyhow!("stub mux op log poisoned"))?
            .push(MuxOp::Gpio(levels));
        Ok(())
    }

    fn write_i2c(&mut self, channel: u8) -> Result<()> {
        self.ops
            .lock()
            .map_err(|_| anyhow!("stub mux op log poisoned"))?
            .push(MuxOp::I2c(channel));
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Hardware bus (hw-mux feature)
// ----------------------------------------------------------------------------

#[cfg(feature = "hw-mux")]
mod hw {
    use super::{MuxBus, MUX_CONTROL_REG, MUX_I2C_ADDR, MUX_I2C_BUS};
    use anyhow::{bail, Context, Result};
    use rppal::gpio::{Gpio, OutputPin};
    use std::process::Command;

    /// BCM numbers for the header pins in `GPIO_HEADER_PINS` (7/11/12).
    const GPIO_BCM_PINS: [u8; 3] = [4, 17, 18];

    /// Real enable lines via rppal; the mux channel switch shells out to
    /// `i2cset`, matching how the rig has always been driven.
    pub struct HwMux {
        pins: [OutputPin; 3],
    }

    impl HwMux {
        pub fn new() -> Result<Self> {
            let gpio = Gpio::new().context("open gpio")?;
            let mut pins = Vec::with_capacity(3);
            for bcm in GPIO_BCM_PINS {
                pins.push(
                    gpio.get(bcm)
                        .with_context(|| format!("claim gpio pin bcm{bcm}"))?
                        .into_output(),
                );
            }
            let pins: [OutputPin; 3] = pins
                .try_into()
                .map_err(|_| anyhow::anyhow!("expected exactly three mux pins"))?;
            Ok(Self { pins })
        }
    }

    impl MuxBus for HwMux {
        fn write_gpio(&mut self, levels: [bool; 3]) -> Result<()> {
            for (pin, level) in self.pins.iter_mut().zip(levels) {
                if level {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
            }
            Ok(())
        }

        fn write_i2c(&mut self, channel: u8) -> Result<()> {
            let status = Command::new("i2cset")
                .args([
                    "-y",
                    &MUX_I2C_BUS.to_string(),
                    &format!("{MUX_I2C_ADDR:#04x}"),
                    &format!("{MUX_CONTROL_REG:#04x}"),
                    &format!("{channel:#04x}"),
                ])
                .status()
                .context("run i2cset")?;
            if !status.success() {
                bail!("i2cset exited with {status}");
            }
            Ok(())
        }
    }
}
