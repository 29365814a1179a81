//! Generation pipelines
//!
//! A pipeline is an opaque capability: given a prompt and generation
//! parameters it produces one frame sequence per requested output. The
//! model manager only sees the two traits defined here; concrete backends
//! (the built-in [`procedural`] generator, or an external diffusion runtime)
//! plug in behind them.

pub mod procedural;

use crate::device::{InferenceDevice, Precision};
use crate::error::{Error, Result};
use crate::request::GenerationParams;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use procedural::{ProceduralLoader, ProceduralPipeline};

/// One of the two named pipeline caches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineSlot {
    #[serde(alias = "txt2video")]
    TextToVideo,
    #[serde(alias = "img2video")]
    ImageToVideo,
}

impl PipelineSlot {
    /// Every slot, in storage order
    pub const ALL: [PipelineSlot; 2] = [PipelineSlot::TextToVideo, PipelineSlot::ImageToVideo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextToVideo => "text-to-video",
            Self::ImageToVideo => "image-to-video",
        }
    }

    /// Position of this slot in the manager's slot table
    pub(crate) fn index(&self) -> usize {
        match self {
            Self::TextToVideo => 0,
            Self::ImageToVideo => 1,
        }
    }
}

impl std::fmt::Display for PipelineSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single RGB8 frame, row-major, tightly packed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    /// Wrap raw RGB bytes, checking the buffer length
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(Error::Inference(format!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Frame filled with a single color
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }
}

/// Frames of one generated video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSequence {
    pub frames: Vec<Frame>,
}

impl FrameSequence {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Dimensions shared by every frame, or `None` for an empty or ragged sequence
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let first = self.frames.first()?;
        self.frames
            .iter()
            .all(|f| f.width == first.width && f.height == first.height)
            .then_some((first.width, first.height))
    }
}

/// Everything a pipeline needs for one call
#[derive(Debug, Clone)]
pub struct GenerationInput {
    pub params: GenerationParams,
    /// Seed image for image-to-video, already resized to the output size
    pub image: Option<Frame>,
}

/// Cooperative cancellation signal handed to a running generation
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A loaded generation capability
///
/// `generate` is blocking and may run for minutes; callers run it on the
/// blocking thread pool. Implementations should poll `cancel` between
/// denoising steps and return [`Error::Cancelled`] once it is set.
pub trait VideoPipeline: Send + Sync {
    /// Model this pipeline was loaded from
    fn model_id(&self) -> &str;

    /// Device the weights live on
    fn device(&self) -> InferenceDevice;

    /// Produce `params.num_videos` frame sequences
    fn generate(&self, input: &GenerationInput, cancel: &CancelFlag) -> Result<Vec<FrameSequence>>;
}

/// Parameters of a single pipeline load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub slot: PipelineSlot,
    pub model_id: String,
    pub device: InferenceDevice,
    pub precision: Precision,
}

/// Instantiates pipelines onto a device
///
/// `load` is blocking (weight download and transfer); the model manager
/// guarantees it is never called concurrently.
pub trait PipelineLoader: Send + Sync {
    fn load(&self, request: &LoadRequest) -> Result<Arc<dyn VideoPipeline>>;
}
