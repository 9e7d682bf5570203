//! The shared camera peripheral.
//!
//! Exactly one physical camera sits behind the multiplexer; this module owns
//! the abstraction over it. A peripheral is a stop/configure/start/capture
//! device: it must be stopped before it can be reconfigured, which is what
//! the `rig` state machine enforces.
//!
//! Two backends:
//! - `StubPeripheral`: synthetic frames, always compiled. Used for
//!   `stub://` device paths and by the test suite.
//! - `V4l2Peripheral`: a real device node via the `v4l` crate (`hw-camera`
//!   feature).

use anyhow::{anyhow, bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::frame::Frame;

/// Pixel geometry for one capture mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorGeometry {
    pub width: u32,
    pub height: u32,
}

/// Low-res continuous streaming configuration.
pub const VIDEO_GEOMETRY: SensorGeometry = SensorGeometry {
    width: 320,
    height: 240,
};

/// Full-res single-shot configuration.
pub const STILL_GEOMETRY: SensorGeometry = SensorGeometry {
    width: 4056,
    height: 3040,
};

/// The single camera peripheral handle.
///
/// Contract: `configure` is only valid while stopped; `capture` is only
/// valid while started. Callers (the rig) are responsible for sequencing.
pub trait Peripheral: Send {
    fn configure(&mut self, geometry: SensorGeometry) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn capture(&mut self) -> Result<Frame>;
}

/// Open a peripheral for a device path. `stub://...` paths get the synthetic
/// backend; anything else needs the `hw-camera` feature.
pub fn open_peripheral(device: &str) -> Result<Box<dyn Peripheral>> {
    if device.starts_with("stub://") {
        return Ok(Box::new(StubPeripheral::new()));
    }
    #[cfg(feature = "hw-camera")]
    {
        return Ok(Box::new(v4l2::V4l2Peripheral::new(device)));
    }
    #[cfg(not(feature = "hw-camera"))]
    bail!("device '{device}' requested but built without the hw-camera feature")
}

// ----------------------------------------------------------------------------
// Stub backend
// ----------------------------------------------------------------------------

/// A peripheral operation, as recorded by `StubPeripheral`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeripheralOp {
    Configure(SensorGeometry),
    Start,
    Stop,
    Capture,
}

/// Shared observation/control surface for a `StubPeripheral`.
///
/// Tests grab this handle before the peripheral is boxed into a rig, then
/// assert on the recorded op sequence or inject capture failures.
pub struct StubState {
    pub ops: Mutex<Vec<PeripheralOp>>,
    pub fail_capture: AtomicBool,
}

/// Synthetic camera peripheral. Honors the stop-before-configure contract
/// strictly so the rig's sequencing bugs surface as errors in tests.
pub struct StubPeripheral {
    geometry: Option<SensorGeometry>,
    started: bool,
    frame_count: u64,
    shared: Arc<StubState>,
}

impl StubPeripheral {
    pub fn new() -> Self {
        Self {
            geometry: None,
            started: false,
            frame_count: 0,
            shared: Arc::new(StubState {
                ops: Mutex::new(Vec::new()),
                fail_capture: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> Arc<StubState> {
        Arc::clone(&self.shared)
    }

    fn record(&self, op: PeripheralOp) -> Result<()> {
        self.shared
            .ops
            .lock()
            .map_err(|_| anyhow!("stub peripheral op log poisoned"))?
            .push(op);
        Ok(())
    }

    /// Deterministic pixel pattern that varies per frame, so consecutive
    /// frames (and their JPEGs) differ.
    fn synthetic_pixels(&self, geometry: SensorGeometry) -> Vec<u8> {
        let len = (geometry.width * geometry.height * 3) as usize;
        let mut pixels = vec![0u8; len];
        for (i, px) in pixels.iter_mut().enumerate() {
            *px = ((i as u64 + self.frame_count * 31) % 256) as u8;
        }
        pixels
    }
}

impl Default for StubPeripheral {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for StubPeripheral {
    fn configure(&mut self, geometry: SensorGeometry) -> Result<()> {
        if self.started {
            bail!("cannot configure a running peripheral");
        }
        self.record(PeripheralOp::Configure(geometry))?;
        self.geometry = Some(geometry);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.geometry.is_none() {
            bail!("cannot start an unconfigured peripheral");
        }
        if self.started {
            bail!("peripheral already started");
        }
        self.record(PeripheralOp::Start)?;
        self.started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.record(PeripheralOp::Stop)?;
        self.started = false;
        Ok(())
    }

    fn capture(&mut self) -> Result<Frame> {
        self.record(PeripheralOp::Capture)?;
        if !self.started {
            bail!("capture on stopped peripheral");
        }
        if self.shared.fail_capture.load(Ordering::SeqCst) {
            bail!("injected capture failure");
        }
        let geometry = self
            .geometry
            .ok_or_else(|| anyhow!("capture on unconfigured peripheral"))?;
        self.frame_count += 1;
        Ok(Frame::new(
            self.synthetic_pixels(geometry),
            geometry.width,
            geometry.height,
        ))
    }
}

// ----------------------------------------------------------------------------
// V4L2 backend (hw-camera feature)
// ----------------------------------------------------------------------------

#[cfg(feature = "hw-camera")]
mod v4l2 {
    use super::{Peripheral, SensorGeometry};
    use crate::frame::Frame;
    use anyhow::{anyhow, bail, Context, Result};
    use ouroboros::self_referencing;

    const STREAM_BUFFERS: u32 = 4;

    #[self_referencing]
    struct DeviceState {
        device: v4l::Device,
        #[borrows(mut device)]
        #[covariant]
        stream: v4l::prelude::MmapStream<'this, v4l::Device>,
    }

    /// Real camera peripheral over a V4L2 device node.
    ///
    /// `configure` records the wanted geometry; the device is opened and the
    /// format applied on `start`, because the mmap stream borrows the device
    /// and both must be torn down together on `stop`.
    pub struct V4l2Peripheral {
        device_path: String,
        wanted: Option<SensorGeometry>,
        active: Option<ActiveDevice>,
    }

    struct ActiveDevice {
        state: DeviceState,
        width: u32,
        height: u32,
    }

    impl V4l2Peripheral {
        pub fn new(device_path: &str) -> Self {
            Self {
                device_path: device_path.to_string(),
                wanted: None,
                active: None,
            }
        }
    }

    impl Peripheral for V4l2Peripheral {
        fn configure(&mut self, geometry: SensorGeometry) -> Result<()> {
            if self.active.is_some() {
                bail!("cannot configure a running peripheral");
            }
            self.wanted = Some(geometry);
            Ok(())
        }

        fn start(&mut self) -> Result<()> {
            use v4l::buffer::Type;
            use v4l::video::Capture;

            let wanted = self
                .wanted
                .ok_or_else(|| anyhow!("cannot start an unconfigured peripheral"))?;
            if self.active.is_some() {
                bail!("peripheral already started");
            }

            let device = v4l::Device::with_path(&self.device_path)
                .with_context(|| format!("open v4l2 device {}", self.device_path))?;
            let mut format = device.format().context("read v4l2 format")?;
            format.width = wanted.width;
            format.height = wanted.height;
            format.fourcc = v4l::FourCC::new(b"RGB3");
            let format = device.set_format(&format).context("set v4l2 format")?;
            if format.fourcc != v4l::FourCC::new(b"RGB3") {
                bail!("device {} does not support RGB3 output", self.device_path);
            }

            let width = format.width;
            let height = format.height;
            let state = DeviceStateBuilder {
                device,
                stream_builder: |device| {
                    v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                        .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
                },
            }
            .try_build()?;

            self.active = Some(ActiveDevice {
                state,
                width,
                height,
            });
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            // Dropping the state releases the stream and the device node.
            self.active = None;
            Ok(())
        }

        fn capture(&mut self) -> Result<Frame> {
            use v4l::io::traits::CaptureStream;

            let active = self
                .active
                .as_mut()
                .ok_or_else(|| anyhow!("capture on stopped peripheral"))?;
            let (buf, _meta) = active
                .state
                .with_mut(|fields| fields.stream.next())
                .context("capture v4l2 frame")?;
            // Buffers can carry trailing padding beyond the pixel payload.
            let mut data = buf.to_vec();
            data.truncate((active.width * active.height * 3) as usize);
            Ok(Frame::new(data, active.width, active.height))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_enforces_stop_before_configure() {
        let mut cam = StubPeripheral::new();
        cam.configure(VIDEO_GEOMETRY).expect("configure");
        cam.start().expect("start");
        assert!(cam.configure(STILL_GEOMETRY).is_err());
        cam.stop().expect("stop");
        cam.configure(STILL_GEOMETRY).expect("configure after stop");
    }

    #[test]
    fn stub_capture_requires_running_peripheral() {
        let mut cam = StubPeripheral::new();
        assert!(cam.capture().is_err());
        cam.configure(VIDEO_GEOMETRY).expect("configure");
        cam.start().expect("start");
        let frame = cam.capture().expect("capture");
        assert_eq!(frame.width, VIDEO_GEOMETRY.width);
        assert_eq!(
            frame.data.len(),
            (VIDEO_GEOMETRY.width * VIDEO_GEOMETRY.height * 3) as usize
        );
    }

    #[test]
    fn stub_failure_injection() {
        let mut cam = StubPeripheral::new();
        let state = cam.state();
        cam.configure(VIDEO_GEOMETRY).expect("configure");
        cam.start().expect("start");
        state.fail_capture.store(true, Ordering::SeqCst);
        assert!(cam.capture().is_err());
        state.fail_capture.store(false, Ordering::SeqCst);
        assert!(cam.capture().is_ok());
    }

    #[test]
    fn open_peripheral_accepts_stub_paths() {
        assert!(open_peripheral("stub://rig").is_ok());
    }
}
