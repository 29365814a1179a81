//! Videogen core
//!
//! Model lifecycle management and request orchestration for a
//! text/image-to-video generation service.
//!
//! The [`ModelManager`] lazily loads up to two pipelines (text-to-video,
//! image-to-video) onto the inference device, serializes concurrent loads
//! and releases device memory on demand. The [`GenerationService`] runs a
//! request through validation, generation, export and upload.
//!
//! # Features
//!
//! - `cuda` - CUDA availability detection and memory release via candle
//!
//! # Example
//!
//! ```ignore
//! use videogen_core::{DeviceContext, ModelManager, PipelineSlot, ProceduralLoader};
//!
//! let manager = ModelManager::new(Arc::new(ProceduralLoader::new()), DeviceContext::cpu());
//! let pipeline = manager.get_pipeline(PipelineSlot::TextToVideo, "Lightricks/LTX-Video").await?;
//! ```

pub mod artifact;
pub mod config;
pub mod device;
pub mod error;
pub mod export;
pub mod generation;
pub mod manager;
pub mod pipeline;
pub mod request;
pub mod seed_image;
pub mod storage;

pub use artifact::{artifact_file_name, TempArtifact};
pub use config::{GenerationDefaults, Settings, StorageConfig};
pub use device::{Accelerator, DeviceContext, DeviceSelector, InferenceDevice, Precision, SystemAccelerator};
pub use error::{Error, FieldError, Result};
pub use export::{FfmpegExporter, FrameExporter};
pub use generation::{GenerationOptions, GenerationService};
pub use manager::{ClearReport, ManagerStatus, ModelManager, SlotStatus};
pub use pipeline::{
    CancelFlag, Frame, FrameSequence, GenerationInput, LoadRequest, PipelineLoader, PipelineSlot,
    ProceduralLoader, ProceduralPipeline, VideoPipeline,
};
pub use request::{GenerationParams, GenerationRequest, ImageGenerationRequest};
pub use seed_image::ImageLoader;
pub use storage::{ObjectStorage, StorageGateway};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
