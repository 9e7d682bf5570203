//! muxcam_capture - batch still capture for a session.
//!
//! Invoked on the Pi (usually remotely by `muxcam_session`): reads the
//! session config, captures one full-res still per enabled camera into the
//! session image tree, then leaves the rig idle.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use muxcam::config::{SessionParams, DEFAULT_PARAMS_PATH, REMOTE_IMAGES_ROOT};
use muxcam::rig::SettleDelays;
use muxcam::{batch, mux, peripheral, CameraRig};

#[derive(Debug, Parser)]
#[command(name = "muxcam_capture", about = "Capture session stills from the rig")]
struct Args {
    /// Image folder within the session directory (`images` or `inspect`).
    image_folder: String,

    /// Session config file.
    #[arg(long, default_value = DEFAULT_PARAMS_PATH)]
    params: PathBuf,

    /// Root of the session image tree.
    #[arg(long, default_value = REMOTE_IMAGES_ROOT)]
    images_root: PathBuf,

    /// Camera device path; `stub://` paths use the synthetic backend.
    #[arg(long, env = "MUXCAM_DEVICE", default_value = "/dev/video0")]
    device: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let params = SessionParams::load(&args.params)
        .with_context(|| format!("load session config {}", args.params.display()))?;

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

    let written = batch::run(&mut rig, &params, &args.image_folder, &args.images_root)?;
    log::info!("captured {} image(s)", written.len());
    Ok(())
}
