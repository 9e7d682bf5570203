//! muxcam - multiplexed four-camera Raspberry Pi rig
//!
//! Four camera sensors sit behind a GPIO + I2C multiplexer that routes one of
//! them to the single camera interface of a Raspberry Pi. This crate drives
//! that rig:
//!
//! - `mux`: selects a logical camera (A..D) by applying its GPIO pin pattern
//!   and I2C multiplexer command, with a settle delay.
//! - `peripheral`: the single shared camera peripheral behind a trait, with a
//!   synthetic stub backend (always available) and a V4L2 backend
//!   (`hw-camera` feature).
//! - `rig`: the mode state machine (NONE/VIDEO/STILL). The peripheral cannot
//!   be reconfigured while running, so every mode change fully stops it first.
//! - `gate`: serializes streaming reads and snapshots on the shared
//!   peripheral. A pause flag suspends streaming while a snapshot holds the
//!   rig; the flag is cleared on every exit path.
//! - `server`: the HTTP surface (`/video_feed/{id}`, `/snapshot/{id}`,
//!   `/health`) served over plain TCP, one thread per connection.
//! - `batch` / `session`: session capture on the Pi and its control-side
//!   driver (remote exec + file fetch).

pub mod batch;
pub mod config;
pub mod frame;
pub mod gate;
pub mod mux;
pub mod peripheral;
pub mod rig;
pub mod server;
pub mod session;
pub mod storage;

pub use frame::Frame;
pub use gate::SnapshotGate;
pub use mux::{CameraId, Selector};
pub use peripheral::{open_peripheral, Peripheral, StubPeripheral};
pub use rig::{CameraRig, CaptureMode, SettleDelays};
pub use server::{ServerConfig, ServerHandle, StreamServer};
