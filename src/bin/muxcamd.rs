//! muxcamd - streaming/snapshot daemon for the multiplexed camera rig.
//!
//! Owns the camera peripheral for its lifetime: starts in VIDEO mode, serves
//! MJPEG streams and on-demand snapshots over HTTP, and stops the peripheral
//! on Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use muxcam::rig::SettleDelays;
use muxcam::server::{ServerConfig, StreamServer};
use muxcam::{mux, peripheral, CameraRig, SnapshotGate};

#[derive(Debug, Parser)]
#[command(name = "muxcamd", about = "Multiplexed camera rig streaming daemon")]
struct Args {
    /// Listen address.
    #[arg(long, env = "MUXCAM_ADDR", default_value = "0.0.0.0:5001")]
    addr: String,

    /// Camera device path; `stub://` paths use the synthetic backend.
    #[arg(long, env = "MUXCAM_DEVICE", default_value = "/dev/video0")]
    device: String,

    /// Directory for persisted snapshots.
    #[arg(long, env = "MUXCAM_SNAPSHOT_DIR", default_value = "snapshots")]
    snapshot_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let stub = args.device.starts_with("stub://");
    let settle = if stub {
        SettleDelays::none()
    } else {
        SettleDelays::default()
    };
    let peripheral = peripheral::open_peripheral(&args.device)?;
    let bus = mux::open_bus(stub)?;
    let selector = muxcam::Selector::new(bus, settle.select);

    let mut rig = CameraRig::new(peripheral, selector, settle);
    rig.startup().context("initialize camera rig")?;
    let gate = Arc::new(SnapshotGate::new(rig));

    let server = StreamServer::new(
        ServerConfig {
            addr: args.addr,
            snapshot_dir: args.snapshot_dir,
        },
        Arc::clone(&gate),
    );
    let handle = server.spawn()?;
    log::info!("muxcamd listening on {} (device {})", handle.addr, args.device);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install signal handler")?;
    rx.recv().context("wait for shutdown signal")?;

    log::info!("shutting down");
    handle.stop()?;
    gate.shutdown().context("stop camera rig")?;
    Ok(())
}
