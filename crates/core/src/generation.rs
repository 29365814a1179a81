//! Request orchestration
//!
//! [`GenerationService`] ties the pieces together for one request:
//! validate, check the device, fetch the seed image, obtain the pipeline,
//! generate on the blocking pool, export each needed sequence to a
//! temporary file, upload it and return the URLs. Temporary files are
//! removed on every exit path.

use crate::artifact::TempArtifact;
use crate::config::{GenerationDefaults, Settings};
use crate::error::{Error, Result};
use crate::export::FrameExporter;
use crate::manager::ModelManager;
use crate::pipeline::{CancelFlag, Frame, FrameSequence, GenerationInput, PipelineSlot, VideoPipeline};
use crate::request::{GenerationParams, GenerationRequest, ImageGenerationRequest};
use crate::seed_image::ImageLoader;
use crate::storage::StorageGateway;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Per-service generation settings
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model_id: String,
    pub defaults: GenerationDefaults,
    /// Directory for temporary video files
    pub output_dir: PathBuf,
    /// Deadline for a single pipeline call
    pub timeout: Option<Duration>,
}

impl From<&Settings> for GenerationOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            model_id: settings.model_id.clone(),
            defaults: settings.defaults.clone(),
            output_dir: settings.output_dir.clone(),
            timeout: settings.generation_timeout,
        }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// How many of the generated sequences get exported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outputs {
    First,
    All,
}

/// Generation workflow shared by every endpoint
pub struct GenerationService {
    manager: Arc<ModelManager>,
    storage: Arc<dyn StorageGateway>,
    exporter: Arc<dyn FrameExporter>,
    images: ImageLoader,
    options: GenerationOptions,
}

impl GenerationService {
    pub fn new(
        manager: Arc<ModelManager>,
        storage: Arc<dyn StorageGateway>,
        exporter: Arc<dyn FrameExporter>,
        images: ImageLoader,
        options: GenerationOptions,
    ) -> Self {
        Self {
            manager,
            storage,
            exporter,
            images,
            options,
        }
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn storage(&self) -> &Arc<dyn StorageGateway> {
        &self.storage
    }

    /// Generate one video from a prompt and return its URL
    pub async fn text_to_video(&self, request: &GenerationRequest) -> Result<String> {
        let params = request.normalize(&self.options.defaults)?;
        let urls = self
            .run(PipelineSlot::TextToVideo, params, None, Outputs::First)
            .instrument(request_span("txt2video"))
            .await?;
        first_url(urls)
    }

    /// Generate `num_videos_per_prompt` videos and return every URL
    pub async fn text_to_video_batch(&self, request: &GenerationRequest) -> Result<Vec<String>> {
        let params = request.normalize(&self.options.defaults)?;
        self.run(PipelineSlot::TextToVideo, params, None, Outputs::All)
            .instrument(request_span("txt2video_batch"))
            .await
    }

    /// Generate one video conditioned on a seed image
    pub async fn image_to_video(&self, request: &ImageGenerationRequest) -> Result<String> {
        let params = request.normalize(&self.options.defaults)?;
        let source = request.image_url.trim().to_string();

        async {
            self.manager.device_context().ensure_available()?;
            let image = self
                .images
                .load(&source, params.width, params.height)
                .await?;
            let urls = self
                .run(PipelineSlot::ImageToVideo, params, Some(image), Outputs::First)
                .await?;
            first_url(urls)
        }
        .instrument(request_span("img2video"))
        .await
    }

    async fn run(
        &self,
        slot: PipelineSlot,
        params: GenerationParams,
        image: Option<Frame>,
        outputs: Outputs,
    ) -> Result<Vec<String>> {
        self.manager.device_context().ensure_available()?;

        let started = Instant::now();
        info!(
            slot = %slot,
            width = params.width,
            height = params.height,
            num_frames = params.num_frames,
            num_videos = params.num_videos,
            seeded = params.seed.is_some(),
            "Starting generation"
        );

        let pipeline = self.manager.get_pipeline(slot, &self.options.model_id).await?;
        let fps = params.fps;
        let wanted = match outputs {
            Outputs::First => 1,
            Outputs::All => params.num_videos as usize,
        };
        let sequences = self.generate(pipeline, GenerationInput { params, image }).await?;

        if sequences.len() < wanted {
            return Err(Error::Inference(format!(
                "pipeline produced {} of {} requested videos",
                sequences.len(),
                wanted
            )));
        }

        tokio::fs::create_dir_all(&self.options.output_dir).await?;

        let mut urls = Vec::with_capacity(wanted);
        for frames in sequences.iter().take(wanted) {
            let artifact = TempArtifact::new(&self.options.output_dir);
            self.exporter.export(frames, fps, artifact.path()).await?;
            debug!(file = artifact.file_name(), "Uploading artifact");
            urls.push(self.storage.upload(artifact.path()).await?);
        }

        info!(
            slot = %slot,
            videos = urls.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(urls)
    }

    /// Run the pipeline on the blocking pool, honouring the deadline
    async fn generate(
        &self,
        pipeline: Arc<dyn VideoPipeline>,
        input: GenerationInput,
    ) -> Result<Vec<FrameSequence>> {
        let cancel = CancelFlag::new();
        let task = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            move || pipeline.generate(&input, &cancel)
        });

        let joined = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.cancel();
                    warn!(timeout_ms = limit.as_millis() as u64, "Generation deadline exceeded");
                    return Err(Error::Timeout(limit));
                }
            },
            None => task.await,
        };

        match joined.map_err(|e| Error::Inference(format!("generation task failed: {}", e)))? {
            Ok(sequences) => Ok(sequences),
            Err(e) if e.is_out_of_memory() => {
                self.manager.release_device_memory();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("manager", &self.manager)
            .field("options", &self.options)
            .finish()
    }
}

fn request_span(kind: &'static str) -> tracing::Span {
    let id = Uuid::new_v4().simple().to_string();
    tracing::info_span!("generation", kind, request_id = &id[..8])
}

fn first_url(urls: Vec<String>) -> Result<String> {
    urls.into_iter()
        .next()
        .ok_or_else(|| Error::Inference("pipeline produced no videos".to_string()))
}
