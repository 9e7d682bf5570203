//! Serialization of snapshot and streaming access to the rig.
//!
//! Two operations compete for the single peripheral: repeated low-res
//! streaming reads (tolerant of being skipped) and rare high-res snapshots
//! (which must not interleave with mode changes). The gate uses two distinct
//! primitives:
//!
//! - a pause flag (`Mutex<bool>` + `Condvar`) that tells streaming loops to
//!   stop pulling frames while a snapshot is pending, with bounded waits
//!   instead of busy-polling;
//! - a mutex over the `CameraRig` for exclusive peripheral access, held only
//!   for select+switch+capture+switch-back, never for a whole streaming loop.
//!
//! The flag is raised before the rig lock is taken and cleared after it is
//! released, on every exit path (a drop guard clears it even on error), so a
//! failed snapshot can never leave streaming suspended.

use anyhow::{anyhow, Context, Result};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::mux::CameraId;
use crate::rig::{CameraRig, CaptureMode};

pub struct SnapshotGate {
    rig: Mutex<CameraRig>,
    paused: Mutex<bool>,
    pause_cleared: Condvar,
}

impl SnapshotGate {
    pub fn new(rig: CameraRig) -> Self {
        Self {
            rig: Mutex::new(rig),
            paused: Mutex::new(false),
            pause_cleared: Condvar::new(),
        }
    }

    fn lock_rig(&self) -> Result<MutexGuard<'_, CameraRig>> {
        self.rig.lock().map_err(|_| anyhow!("camera rig lock poisoned"))
    }

    /// Whether a snapshot currently holds (or is about to take) the rig.
    pub fn snapshot_pending(&self) -> Result<bool> {
        Ok(*self
            .paused
            .lock()
            .map_err(|_| anyhow!("pause flag lock poisoned"))?)
    }

    /// Capture one streaming frame from `id`, or `None` while a snapshot is
    /// pending. Never blocks beyond the rig lock itself.
    pub fn streaming_frame(&self, id: CameraId) -> Result<Option<Frame>> {
        if self.snapshot_pending()? {
            return Ok(None);
        }
        let mut rig = self.lock_rig()?;
        // A snapshot may have raised the flag while we waited for the rig.
        if self.snapshot_pending()? {
            return Ok(None);
        }
        // Self-heal: a failed snapshot leaves best-effort VIDEO state, but if
        // even that failed the stream brings the peripheral back itself.
        if rig.mode() != CaptureMode::Video {
            rig.switch_mode(CaptureMode::Video)
                .context("restore video mode for streaming")?;
        }
        rig.select_camera(id)?;
        rig.capture_frame().map(Some)
    }

    /// Block until the pause flag clears, up to `max_wait`. Returns whether
    /// the flag is clear. Bounded; never waits indefinitely.
    pub fn wait_while_paused(&self, max_wait: Duration) -> Result<bool> {
        let deadline = Instant::now() + max_wait;
        let mut paused = self
            .paused
            .lock()
            .map_err(|_| anyhow!("pause flag lock poisoned"))?;
        while *paused {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _timeout) = self
                .pause_cleared
                .wait_timeout(paused, deadline - now)
                .map_err(|_| anyhow!("pause flag lock poisoned"))?;
            paused = guard;
        }
        Ok(true)
    }

    /// One-off high-resolution capture from `id`.
    ///
    /// Protocol: raise the pause flag, take exclusive rig access, select the
    /// camera, go STILL, capture, return to VIDEO, release, clear the flag.
    /// On failure the flag still clears and VIDEO is restored best-effort.
    pub fn snapshot(&self, id: CameraId) -> Result<Frame> {
        self.set_paused(true);
        let _pause = PauseGuard { gate: self };
        let mut rig = self.lock_rig()?;
        match Self::snapshot_locked(&mut rig, id) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                if let Err(restore) = rig.switch_mode(CaptureMode::Video) {
                    log::error!("failed to restore video mode after snapshot error: {restore:#}");
                }
                Err(err)
            }
        }
        // `rig` unlocks here, then `_pause` clears the flag and wakes waiters.
    }

    fn snapshot_locked(rig: &mut CameraRig, id: CameraId) -> Result<Frame> {
        rig.select_camera(id)?;
        rig.switch_mode(CaptureMode::Still)?;
        let frame = rig.capture_frame().context("capture still frame")?;
        rig.switch_mode(CaptureMode::Video)
            .context("restore video mode")?;
        Ok(frame)
    }

    /// Stop the peripheral; used at daemon shutdown.
    pub fn shutdown(&self) -> Result<()> {
        self.lock_rig()?.shutdown()
    }

    fn set_paused(&self, value: bool) {
        // Recover the flag even if a holder panicked; leaving it stuck would
        // suspend streaming forever.
        let mut paused = self
            .paused
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *paused = value;
        if !value {
            self.pause_cleared.notify_all();
        }
    }
}

struct PauseGuard<'a> {
    gate: &'a SnapshotGate,
}

impl Drop for PauseGuard<'_> {
    fn drop(&mut self) {
        self.gate.set_paused(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{Selector, StubMux};
    use crate::peripheral::{PeripheralOp, SensorGeometry, StubPeripheral, StubState};
    use crate::rig::SettleDelays;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn test_gate() -> (SnapshotGate, Arc<StubState>) {
        let peripheral = StubPeripheral::new();
        let state = peripheral.state();
        let selector = Selector::new(Box::new(StubMux::new()), Duration::ZERO);
        let mut rig = CameraRig::new(Box::new(peripheral), selector, SettleDelays::none());
        rig.startup().expect("rig startup");
        (SnapshotGate::new(rig), state)
    }

    fn configure_sequence(state: &StubState) -> Vec<SensorGeometry> {
        state
            .ops
            .lock()
            .expect("op log")
            .iter()
            .filter_map(|op| match op {
                PeripheralOp::Configure(geometry) => Some(*geometry),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn snapshot_returns_full_res_frame_and_restores_video() -> Result<()> {
        let (gate, _state) = test_gate();
        let frame = gate.snapshot(CameraId::B)?;
        assert_eq!(frame.width, crate::peripheral::STILL_GEOMETRY.width);
        assert!(!gate.snapshot_pending()?);

        // Streaming works right after.
        let streamed = gate.streaming_frame(CameraId::A)?;
        assert!(streamed.is_some());
        Ok(())
    }

    #[test]
    fn flag_clears_even_when_capture_fails() -> Result<()> {
        let (gate, state) = test_gate();
        state.fail_capture.store(true, Ordering::SeqCst);
        assert!(gate.snapshot(CameraId::C).is_err());
        assert!(!gate.snapshot_pending()?, "pause flag must clear on error");

        // Streaming self-heals afterwards.
        state.fail_capture.store(false, Ordering::SeqCst);
        assert!(gate.streaming_frame(CameraId::A)?.is_some());
        Ok(())
    }

    #[test]
    fn failed_snapshot_leaves_video_mode_for_streaming() -> Result<()> {
        let (gate, state) = test_gate();
        state.fail_capture.store(true, Ordering::SeqCst);
        let _ = gate.snapshot(CameraId::B);
        state.fail_capture.store(false, Ordering::SeqCst);

        // Last configure should be the best-effort VIDEO restore.
        let configures = configure_sequence(&state);
        assert_eq!(
            configures.last().copied(),
            Some(crate::peripheral::VIDEO_GEOMETRY)
        );
        Ok(())
    }

    #[test]
    fn concurrent_snapshots_serialize_without_interleaving() -> Result<()> {
        let (gate, state) = test_gate();
        let gate = Arc::new(gate);

        let mut handles = Vec::new();
        for id in [CameraId::B, CameraId::C] {
            let gate = Arc::clone(&gate);
            handles.push(std::thread::spawn(move || gate.snapshot(id)));
        }
        for handle in handles {
            handle.join().expect("snapshot thread")?;
        }

        // Startup configures VIDEO once; each snapshot then contributes a
        // STILL followed by its VIDEO restore, with no overlap.
        let configures = configure_sequence(&state);
        assert_eq!(
            configures,
            vec![
                crate::peripheral::VIDEO_GEOMETRY,
                crate::peripheral::STILL_GEOMETRY,
                crate::peripheral::VIDEO_GEOMETRY,
                crate::peripheral::STILL_GEOMETRY,
                crate::peripheral::VIDEO_GEOMETRY,
            ]
        );
        Ok(())
    }

    #[test]
    fn streaming_skips_while_snapshot_pending() -> Result<()> {
        let (gate, _state) = test_gate();
        gate.set_paused(true);
        assert_eq!(gate.streaming_frame(CameraId::A)?.map(|_| ()), None);
        assert!(!gate.wait_while_paused(Duration::from_millis(10))?);
        gate.set_paused(false);
        assert!(gate.wait_while_paused(Duration::from_millis(10))?);
        assert!(gate.streaming_frame(CameraId::A)?.is_some());
        Ok(())
    }

    #[test]
    fn stream_survives_a_snapshot_on_another_camera() -> Result<()> {
        // Streaming camera A while snapshotting camera B: the stream may
        // observe skips but never an error, and resumes when the flag clears.
        let (gate, _state) = test_gate();
        let gate = Arc::new(gate);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let streamer = {
            let gate = Arc::clone(&gate);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || -> Result<(u32, u32)> {
                let mut frames = 0u32;
                let mut skips = 0u32;
                while !stop.load(Ordering::SeqCst) {
                    match gate.streaming_frame(CameraId::A)? {
                        Some(_) => frames += 1,
                        None => {
                            skips += 1;
                            gate.wait_while_paused(Duration::from_millis(5))?;
                        }
                    }
                }
                Ok((frames, skips))
            })
        };

        for _ in 0..5 {
            gate.snapshot(CameraId::B)?;
        }
        stop.store(true, Ordering::SeqCst);
        let (frames, _skips) = streamer.join().expect("streamer thread")?;
        assert!(frames > 0, "stream should capture frames around snapshots");
        Ok(())
    }
}
