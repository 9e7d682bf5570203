//! Control-side capture sessions.
//!
//! Runs a capture session against the Pi from a desktop machine. All remote
//! interaction goes through the `RemoteChannel` trait: run a command, list a
//! directory, fetch files. The production implementation shells out to
//! `ssh`/`scp`; tests substitute an in-memory fake. The session logic itself
//! knows nothing about transports.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::SessionParams;
use crate::mux::CameraId;

/// Remote command/file-transfer channel to the Pi.
pub trait RemoteChannel {
    /// Run a command remotely, returning its stdout.
    fn exec(&mut self, command: &str) -> Result<Vec<u8>>;
    /// File names (not paths) in a remote directory.
    fn list_dir(&mut self, path: &str) -> Result<Vec<String>>;
    /// Fetch one remote file's contents.
    fn fetch_file(&mut self, path: &str) -> Result<Vec<u8>>;
    /// Recursively copy a remote directory below `local`.
    fn fetch_dir(&mut self, remote: &str, local: &Path) -> Result<()>;
}

/// `ssh`/`scp` backed channel.
pub struct SshChannel {
    user: String,
    host: String,
}

impl SshChannel {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn ssh_output(&self, command: &str) -> Result<Vec<u8>> {
        let output = Command::new("ssh")
            .arg(self.target())
            .arg(command)
            .output()
            .with_context(|| format!("run ssh to {}", self.host))?;
        if !output.status.success() {
            bail!(
                "remote command '{command}' failed on {}: {}",
                self.host,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(output.stdout)
    }
}

impl RemoteChannel for SshChannel {
    fn exec(&mut self, command: &str) -> Result<Vec<u8>> {
        self.ssh_output(command)
    }

    fn list_dir(&mut self, path: &str) -> Result<Vec<String>> {
        let out = self.ssh_output(&format!("ls -1 {path}"))?;
        Ok(String::from_utf8_lossy(&out)
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect())
    }

    fn fetch_file(&mut self, path: &str) -> Result<Vec<u8>> {
        self.ssh_output(&format!("cat {path}"))
    }

    fn fetch_dir(&mut self, remote: &str, local: &Path) -> Result<()> {
        let status = Command::new("scp")
            .arg("-r")
            .arg(format!("{}:{remote}", self.target()))
            .arg(local)
            .status()
            .context("run scp")?;
        if !status.success() {
            bail!("scp of {remote} from {} exited with {status}", self.host);
        }
        log::info!("fetched {remote} -> {}", local.display());
        Ok(())
    }
}

/// A fetched session image, tagged with the camera it came from when the
/// file name matches the expected naming scheme.
#[derive(Debug)]
pub struct SessionImage {
    pub file_name: String,
    pub camera: Option<CameraId>,
    pub bytes: Vec<u8>,
}

pub struct CaptureSession<C: RemoteChannel> {
    channel: C,
    params: SessionParams,
}

impl<C: RemoteChannel> CaptureSession<C> {
    pub fn new(channel: C, params: SessionParams) -> Self {
        Self { channel, params }
    }

    /// One-off inspection: capture into `inspect/` and bring the images back
    /// for review, ordered by camera id.
    pub fn inspect(&mut self) -> Result<Vec<SessionImage>> {
        let remote_dir = self.prepare_and_capture("inspect")?;

        let mut images = Vec::new();
        for file_name in self.channel.list_dir(&remote_dir)? {
            if !is_image_file(&file_name) {
                continue;
            }
            let bytes = self
                .channel
                .fetch_file(&format!("{remote_dir}/{file_name}"))
                .with_context(|| format!("fetch {file_name}"))?;
            images.push(SessionImage {
                camera: self.camera_for(&file_name),
                file_name,
                bytes,
            });
        }
        // Unrecognized names sort last.
        images.sort_by_key(|img| (img.camera.is_none(), img.camera, img.file_name.clone()));
        Ok(images)
    }

    /// Full imaging run: capture into `images/` and transfer the directory
    /// to the configured local folder.
    pub fn imaging(&mut self) -> Result<()> {
        let remote_dir = self.prepare_and_capture("images")?;
        let local = self.params.folder_path.clone();
        std::fs::create_dir_all(&local)
            .with_context(|| format!("create local dir {}", local.display()))?;
        self.channel
            .fetch_dir(&remote_dir, &local)
            .context("transfer session images")
    }

    fn prepare_and_capture(&mut self, image_folder: &str) -> Result<String> {
        let remote_dir = self.params.remote_image_dir(image_folder);
        self.channel
            .exec(&format!("sudo mkdir -p {remote_dir}"))
            .context("create remote session dir")?;
        self.channel
            .exec(&format!("sudo muxcam_capture {image_folder}"))
            .context("run remote capture")?;
        Ok(remote_dir)
    }

    fn camera_for(&self, file_name: &str) -> Option<CameraId> {
        self.params
            .enabled_cameras()
            .into_iter()
            .find(|id| self.params.image_file_name(*id) == file_name)
    }
}

fn is_image_file(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".jpg", ".jpeg", ".png"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Destination dir for inspection images fetched to the control machine.
pub fn local_inspect_dir(params: &SessionParams) -> PathBuf {
    params.folder_path.join("inspect")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeChannel {
        commands: Vec<String>,
        listing: Vec<String>,
        files: HashMap<String, Vec<u8>>,
        fetched_dirs: Vec<(String, PathBuf)>,
    }

    impl FakeChannel {
        fn new() -> Self {
            Self {
                commands: Vec::new(),
                listing: Vec::new(),
                files: HashMap::new(),
                fetched_dirs: Vec::new(),
            }
        }
    }

    impl RemoteChannel for FakeChannel {
        fn exec(&mut self, command: &str) -> Result<Vec<u8>> {
            self.commands.push(command.to_string());
            Ok(Vec::new())
        }

        fn list_dir(&mut self, _path: &str) -> Result<Vec<String>> {
            Ok(self.listing.clone())
        }

        fn fetch_file(&mut self, path: &str) -> Result<Vec<u8>> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file {path}"))
        }

        fn fetch_dir(&mut self, remote: &str, local: &Path) -> Result<()> {
            self.fetched_dirs.push((remote.to_string(), local.to_path_buf()));
            Ok(())
        }
    }

    fn test_params() -> SessionParams {
        SessionParams {
            cameras: [true, true, false, true],
            plant_name: "basil".to_string(),
            folder_path: PathBuf::from("/data/basil"),
            folder_with_date: "runs/basil_2026-08-23".to_string(),
            timestamp: "2026-08-23 10:00:00".to_string(),
            pi_hostname: "imagepi.local".to_string(),
        }
    }

    #[test]
    fn inspect_orders_images_by_camera() -> Result<()> {
        let params = test_params();
        let dir = params.remote_image_dir("inspect");
        let mut channel = FakeChannel::new();
        // Listing deliberately out of order, with one non-image entry.
        channel.listing = vec![
            "basil_Camera_D_2026-08-23.jpg".to_string(),
            "notes.txt".to_string(),
            "basil_Camera_A_2026-08-23.jpg".to_string(),
            "basil_Camera_B_2026-08-23.jpg".to_string(),
        ];
        for name in &channel.listing {
            channel.files.insert(format!("{dir}/{name}"), b"img".to_vec());
        }

        let mut session = CaptureSession::new(channel, params);
        let images = session.inspect()?;
        let cameras: Vec<_> = images.iter().map(|img| img.camera).collect();
        assert_eq!(
            cameras,
            vec![Some(CameraId::A), Some(CameraId::B), Some(CameraId::D)]
        );
        Ok(())
    }

    #[test]
    fn inspect_runs_mkdir_then_capture() -> Result<()> {
        let mut session = CaptureSession::new(FakeChannel::new(), test_params());
        session.inspect()?;
        assert_eq!(
            session.channel.commands,
            vec![
                "sudo mkdir -p /home/imagepi/Images/basil_2026-08-23/inspect",
                "sudo muxcam_capture inspect",
            ]
        );
        Ok(())
    }

    #[test]
    fn imaging_fetches_the_whole_directory() -> Result<()> {
        let local = tempfile::tempdir()?;
        let mut params = test_params();
        params.folder_path = local.path().to_path_buf();
        let mut session = CaptureSession::new(FakeChannel::new(), params);
        session.imaging()?;
        assert_eq!(
            session.channel.fetched_dirs,
            vec![(
                "/home/imagepi/Images/basil_2026-08-23/images".to_string(),
                local.path().to_path_buf(),
            )]
        );
        Ok(())
    }
}
