//! Transient video files
//!
//! Every exported video lives on local disk only until it is uploaded.
//! [`TempArtifact`] owns that file and removes it when dropped, so success,
//! failure and cancelled requests all leave the output directory clean.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Unique artifact name: `output_<YYYYmmdd_HHMMSS>_<8 hex chars>.mp4`
pub fn artifact_file_name() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    format!("output_{}_{}.mp4", timestamp, &id[..8])
}

/// Local file deleted on drop
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    /// Reserve a fresh artifact path in `dir`
    ///
    /// The file itself is created by whoever writes to [`TempArtifact::path`].
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(artifact_file_name()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temporary artifact"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_format() {
        let name = artifact_file_name();
        assert!(name.starts_with("output_"));
        assert!(name.ends_with(".mp4"));
        // output_ + 15 timestamp chars + _ + 8 id chars + .mp4
        assert_eq!(name.len(), 7 + 15 + 1 + 8 + 4);
        assert_ne!(artifact_file_name(), artifact_file_name());
    }

    #[test]
    fn test_file_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let artifact = TempArtifact::new(dir.path());
            std::fs::write(artifact.path(), b"data").unwrap();
            assert!(artifact.path().exists());
            artifact.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_without_file_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = TempArtifact::new(dir.path());
        assert!(artifact.file_name().starts_with("output_"));
        drop(artifact);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
