//! Pi-side batch capture: one full-resolution still per enabled camera.
//!
//! This is what a capture session invokes remotely. The batch owns the rig
//! for its whole run, so selection, mode switches and captures need no gate
//! here; there is no competing streaming traffic in this process.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::SessionParams;
use crate::frame::STILL_JPEG_QUALITY;
use crate::mux::CameraId;
use crate::rig::{CameraRig, CaptureMode};

/// Capture stills for every enabled camera into
/// `{images_root}/{plant_folder}/{image_folder}/`. Returns the written
/// paths in camera order.
pub fn run(
    rig: &mut CameraRig,
    params: &SessionParams,
    image_folder: &str,
    images_root: &Path,
) -> Result<Vec<PathBuf>> {
    let dir = images_root
        .join(params.plant_folder())
        .join(image_folder);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create session dir {}", dir.display()))?;

    let mut written = Vec::new();
    for id in params.enabled_cameras() {
        rig.select_camera(id)?;
        rig.switch_mode(CaptureMode::Still)
            .with_context(|| format!("enter still mode for camera {id}"))?;
        let frame = rig
            .capture_frame()
            .with_context(|| format!("capture still from camera {id}"))?;
        let jpeg = frame.encode_jpeg(STILL_JPEG_QUALITY)?;

        let path = dir.join(params.image_file_name(id));
        std::fs::write(&path, &jpeg)
            .with_context(|| format!("write image {}", path.display()))?;
        log::info!("captured camera {id} -> {}", path.display());
        written.push(path);
    }

    // Leave the peripheral stopped and the mux back on camera A.
    rig.switch_mode(CaptureMode::None)?;
    rig.select_camera(CameraId::A)?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionParams;
    use crate::mux::{Selector, StubMux};
    use crate::peripheral::StubPeripheral;
    use crate::rig::SettleDelays;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_rig() -> CameraRig {
        let selector = Selector::new(Box::new(StubMux::new()), Duration::ZERO);
        CameraRig::new(
            Box::new(StubPeripheral::new()),
            selector,
            SettleDelays::none(),
        )
    }

    fn test_params() -> SessionParams {
        SessionParams {
            cameras: [true, false, true, true],
            plant_name: "basil".to_string(),
            folder_path: PathBuf::from("."),
            folder_with_date: "runs/basil_2026-08-23".to_string(),
            timestamp: "2026-08-23 10:00:00".to_string(),
            pi_hostname: String::new(),
        }
    }

    #[test]
    fn writes_one_named_file_per_enabled_camera() -> Result<()> {
        let root = tempdir()?;
        let mut rig = test_rig();
        let written = run(&mut rig, &test_params(), "inspect", root.path())?;

        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                "basil_Camera_A_2026-08-23.jpg",
                "basil_Camera_C_2026-08-23.jpg",
                "basil_Camera_D_2026-08-23.jpg",
            ]
        );
        for path in &written {
            assert!(path.starts_with(root.path().join("basil_2026-08-23/inspect")));
            let bytes = std::fs::read(path)?;
            assert_eq!(&bytes[..2], &[0xff, 0xd8], "expected a JPEG at {path:?}");
        }
        Ok(())
    }

    #[test]
    fn resets_rig_state_after_the_run() -> Result<()> {
        let root = tempdir()?;
        let mut rig = test_rig();
        run(&mut rig, &test_params(), "images", root.path())?;

        assert_eq!(rig.mode(), CaptureMode::None);
        assert!(!rig.is_active());
        assert_eq!(rig.selected_camera(), Some(CameraId::A));
        Ok(())
    }

    #[test]
    fn no_enabled_cameras_writes_nothing() -> Result<()> {
        let root = tempdir()?;
        let mut rig = test_rig();
        let mut params = test_params();
        params.cameras = [false; 4];
        let written = run(&mut rig, &params, "images", root.path())?;
        assert!(written.is_empty());
        Ok(())
    }
}
