//! muxcam_session - control-side session runner.
//!
//! Drives a capture session on the Pi over ssh/scp: `inspect` captures one
//! review set and fetches it locally; `imaging` captures the full session set
//! and transfers it to the configured folder.

use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use muxcam::config::{SessionParams, DEFAULT_PARAMS_PATH};
use muxcam::session::{local_inspect_dir, CaptureSession, SshChannel};

#[derive(Debug, Parser)]
#[command(name = "muxcam_session", about = "Run a capture session against the Pi")]
struct Args {
    /// Session config file.
    #[arg(long, default_value = DEFAULT_PARAMS_PATH)]
    params: PathBuf,

    /// Remote user on the Pi.
    #[arg(long, default_value = "imagepi")]
    user: String,

    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    /// Capture an inspection set and fetch it for review.
    Inspect,
    /// Run the full imaging capture and transfer the results.
    Imaging,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let params = SessionParams::load(&args.params)
        .with_context(|| format!("load session config {}", args.params.display()))?;
    ensure!(
        !params.pi_hostname.is_empty(),
        "pi_hostname is not set in {}",
        args.params.display()
    );

    let channel = SshChannel::new(args.user, params.pi_hostname.clone());
    let mut session = CaptureSession::new(channel, params.clone());

    match args.command {
        SessionCommand::Inspect => {
            let images = session.inspect()?;
            let dir = local_inspect_dir(&params);
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("create {}", dir.display()))?;
            for image in &images {
                let path = dir.join(&image.file_name);
                std::fs::write(&path, &image.bytes)
                    .with_context(|| format!("write {}", path.display()))?;
                match image.camera {
                    Some(id) => log::info!("camera {id}: {}", path.display()),
                    None => log::info!("unrecognized image: {}", path.display()),
                }
            }
            log::info!("fetched {} inspection image(s)", images.len());
        }
        SessionCommand::Imaging => {
            session.imaging()?;
            log::info!("imaging run complete; images under {}", params.folder_path.display());
        }
    }
    Ok(())
}
