//! The persisted session configuration (`params.json`).
//!
//! The record is produced by the control side and read by both the batch
//! capture CLI (camera enable flags, naming inputs) and the session runner
//! (paths, Pi hostname). The capture core only reads it; it never validates
//! or mutates fields beyond what it derives below.

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::mux::CameraId;

pub const DEFAULT_PARAMS_PATH: &str = "params.json";
/// Root of the session image tree on the Pi.
pub const REMOTE_IMAGES_ROOT: &str = "/home/imagepi/Images";

const DEFAULT_PLANT_FOLDER: &str = "default_folder";
const DEFAULT_PLANT_NAME: &str = "default_plant";
const UNKNOWN_DATE: &str = "unknown_date";

#[derive(Debug, Default, Deserialize)]
struct ParamsFile {
    camera_a: Option<u8>,
    camera_b: Option<u8>,
    camera_c: Option<u8>,
    camera_d: Option<u8>,
    plant_name: Option<String>,
    folder_path: Option<PathBuf>,
    folder_with_date: Option<String>,
    timestamp: Option<String>,
    pi_hostname: Option<String>,
}

/// Resolved session parameters.
#[derive(Clone, Debug)]
pub struct SessionParams {
    /// Enable flags in A..D order.
    pub cameras: [bool; 4],
    pub plant_name: String,
    /// Local destination for fetched session images.
    pub folder_path: PathBuf,
    pub folder_with_date: String,
    pub timestamp: String,
    pub pi_hostname: String,
}

impl SessionParams {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let file: ParamsFile = serde_json::from_str(&json)
            .with_context(|| format!("decode config {}", path.display()))?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: ParamsFile) -> Self {
        let flag = |v: Option<u8>| v.unwrap_or(0) == 1;
        Self {
            cameras: [
                flag(file.camera_a),
                flag(file.camera_b),
                flag(file.camera_c),
                flag(file.camera_d),
            ],
            plant_name: file
                .plant_name
                .unwrap_or_else(|| DEFAULT_PLANT_NAME.to_string()),
            folder_path: file.folder_path.unwrap_or_else(|| PathBuf::from(".")),
            folder_with_date: file.folder_with_date.unwrap_or_default(),
            timestamp: file.timestamp.unwrap_or_default(),
            pi_hostname: file.pi_hostname.unwrap_or_default(),
        }
    }

    /// Cameras enabled for this session, in port order.
    pub fn enabled_cameras(&self) -> Vec<CameraId> {
        CameraId::ALL
            .into_iter()
            .zip(self.cameras)
            .filter_map(|(id, enabled)| enabled.then_some(id))
            .collect()
    }

    /// Last path component of `folder_with_date`; the per-plant directory
    /// name on the Pi.
    pub fn plant_folder(&self) -> String {
        let folder = self
            .folder_with_date
            .rsplit('/')
            .next()
            .unwrap_or_default();
        if folder.is_empty() {
            DEFAULT_PLANT_FOLDER.to_string()
        } else {
            folder.to_string()
        }
    }

    /// First `YYYY-MM-DD` found in the timestamp field.
    pub fn capture_date(&self) -> String {
        // The pattern is literal; construction cannot fail.
        match Regex::new(r"\d{4}-\d{2}-\d{2}") {
            Ok(re) => re
                .find(&self.timestamp)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| UNKNOWN_DATE.to_string()),
            Err(_) => UNKNOWN_DATE.to_string(),
        }
    }

    /// Session image file name for one camera.
    pub fn image_file_name(&self, id: CameraId) -> String {
        format!(
            "{}_Camera_{}_{}.jpg",
            self.plant_name,
            id.upper(),
            self.capture_date()
        )
    }

    /// Remote directory for one image folder (`images` or `inspect`).
    pub fn remote_image_dir(&self, image_folder: &str) -> String {
        format!(
            "{REMOTE_IMAGES_ROOT}/{}/{image_folder}",
            self.plant_folder()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SessionParams {
        SessionParams::from_file(ParamsFile {
            camera_a: Some(1),
            camera_b: Some(0),
            camera_c: Some(1),
            camera_d: None,
            plant_name: Some("basil".to_string()),
            folder_path: Some(PathBuf::from("/data/images")),
            folder_with_date: Some("sessions/basil_2026-08-23".to_string()),
            timestamp: Some("2026-08-23 14:02:11".to_string()),
            pi_hostname: Some("imagepi.local".to_string()),
        })
    }

    #[test]
    fn enabled_cameras_in_port_order() {
        assert_eq!(sample().enabled_cameras(), vec![CameraId::A, CameraId::C]);
    }

    #[test]
    fn plant_folder_takes_last_component() {
        assert_eq!(sample().plant_folder(), "basil_2026-08-23");

        let mut params = sample();
        params.folder_with_date = String::new();
        assert_eq!(params.plant_folder(), "default_folder");
    }

    #[test]
    fn capture_date_extracts_first_iso_date() {
        assert_eq!(sample().capture_date(), "2026-08-23");

        let mut params = sample();
        params.timestamp = "no date here".to_string();
        assert_eq!(params.capture_date(), "unknown_date");
    }

    #[test]
    fn image_file_name_uses_uppercase_camera() {
        assert_eq!(
            sample().image_file_name(CameraId::C),
            "basil_Camera_C_2026-08-23.jpg"
        );
    }

    #[test]
    fn loads_from_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("params.json");
        std::fs::write(
            &path,
            r#"{
                "camera_a": 1, "camera_b": 1, "camera_c": 0, "camera_d": 0,
                "plant_name": "mint",
                "folder_path": "/tmp/mint",
                "folder_with_date": "runs/mint_2026-08-01",
                "timestamp": "2026-08-01 09:00:00",
                "pi_hostname": "imagepi.local"
            }"#,
        )?;
        let params = SessionParams::load(&path)?;
        assert_eq!(params.enabled_cameras(), vec![CameraId::A, CameraId::B]);
        assert_eq!(params.pi_hostname, "imagepi.local");
        Ok(())
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(SessionParams::load(Path::new("/nonexistent/params.json")).is_err());
    }
}
