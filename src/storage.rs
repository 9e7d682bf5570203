//! Local snapshot persistence.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::{Path, PathBuf};

use crate::mux::CameraId;

/// Writes snapshot JPEGs under a local directory as
/// `snapshot_{camera_id}_{timestamp}.jpg`.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, id: CameraId, jpeg: &[u8]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir {}", self.dir.display()))?;
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let path = self.dir.join(format!("snapshot_{}_{stamp}.jpg", id.lower()));
        std::fs::write(&path, jpeg)
            .with_context(|| format!("write snapshot {}", path.display()))?;
        log::info!("saved snapshot {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn saves_with_timestamped_name() -> Result<()> {
        let dir = tempdir()?;
        let store = SnapshotStore::new(dir.path().join("snapshots"));
        let path = store.save(CameraId::C, b"\xff\xd8fake")?;

        let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
        assert!(name.starts_with("snapshot_c_"), "got {name}");
        assert!(name.ends_with(".jpg"));
        assert_eq!(std::fs::read(&path)?, b"\xff\xd8fake");
        Ok(())
    }
}
