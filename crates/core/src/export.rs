//! Frame sequence to video file export
//!
//! Encoding is delegated to an external `ffmpeg` process: raw RGB frames are
//! streamed to its stdin and it writes an H.264 MP4 at the requested rate.

use crate::error::{Error, Result};
use crate::pipeline::FrameSequence;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Writes a frame sequence to a playable video file
#[async_trait]
pub trait FrameExporter: Send + Sync {
    async fn export(&self, frames: &FrameSequence, fps: u32, path: &Path) -> Result<()>;
}

/// [`FrameExporter`] that pipes frames through an ffmpeg subprocess
#[derive(Debug, Clone)]
pub struct FfmpegExporter {
    binary: PathBuf,
}

impl FfmpegExporter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, width: u32, height: u32, fps: u32, path: &Path) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-y", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .arg("-s")
            .arg(format!("{}x{}", width, height))
            .arg("-r")
            .arg(fps.to_string())
            .args(["-i", "-"])
            .args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-movflags", "+faststart"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for FfmpegExporter {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl FrameExporter for FfmpegExporter {
    async fn export(&self, frames: &FrameSequence, fps: u32, path: &Path) -> Result<()> {
        let (width, height) = frames.dimensions().ok_or_else(|| {
            Error::Export(if frames.is_empty() {
                "no frames to export".to_string()
            } else {
                "frames have inconsistent dimensions".to_string()
            })
        })?;
        if fps == 0 {
            return Err(Error::Export("fps must be positive".to_string()));
        }

        let started = Instant::now();
        let mut child = self.command(width, height, fps, path).spawn().map_err(|e| {
            Error::Export(format!("failed to start {}: {}", self.binary.display(), e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Export("encoder stdin unavailable".to_string()))?;

        let mut write_error = None;
        for frame in &frames.frames {
            if let Err(e) = stdin.write_all(&frame.data).await {
                write_error = Some(e);
                break;
            }
        }
        if write_error.is_none() {
            write_error = stdin.shutdown().await.err();
        }
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Export(format!("encoder did not exit cleanly: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Export(format!(
                "encoder exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        if let Some(e) = write_error {
            return Err(Error::Export(format!("failed to stream frames: {}", e)));
        }

        debug!(path = %path.display(), "Encoder finished");
        info!(
            frames = frames.len(),
            width,
            height,
            fps,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Exported video"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Frame;

    #[tokio::test]
    async fn test_empty_sequence_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FfmpegExporter::default()
            .export(&FrameSequence::default(), 24, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Export(_)));
    }

    #[tokio::test]
    async fn test_ragged_sequence_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let frames = FrameSequence::new(vec![
            Frame::solid(8, 8, [0; 3]),
            Frame::solid(16, 8, [0; 3]),
        ]);
        let err = FfmpegExporter::default()
            .export(&frames, 24, &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_export_error() {
        let dir = tempfile::tempdir().unwrap();
        let frames = FrameSequence::new(vec![Frame::solid(8, 8, [0; 3])]);
        let path = dir.path().join("out.mp4");
        let err = FfmpegExporter::new(dir.path().join("no-such-ffmpeg"))
            .export(&frames, 24, &path)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Export(_)));
        assert!(!path.exists());
    }
}
