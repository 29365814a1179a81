//! Model lifecycle manager
//!
//! Owns the text-to-video and image-to-video pipelines. Each slot is loaded
//! lazily on first use and at most once: concurrent first callers queue on
//! a manager-wide lock, the first one performs the load and the rest pick
//! up the cached handle after re-checking the slot.
//!
//! Handles are reference counted. [`ModelManager::clear_cache`] drops the
//! manager's references only; a generation already holding a handle keeps
//! the pipeline alive until it finishes, and the next request reloads.

use crate::device::{DeviceContext, InferenceDevice};
use crate::error::{Error, Result};
use crate::pipeline::{LoadRequest, PipelineLoader, PipelineSlot, VideoPipeline};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

type SlotHandle = Option<Arc<dyn VideoPipeline>>;

/// Slot table shared with in-progress load tasks
#[derive(Default)]
struct Slots([RwLock<SlotHandle>; 2]);

impl Slots {
    fn get(&self, slot: PipelineSlot) -> SlotHandle {
        self.0[slot.index()].read().clone()
    }

    fn is_set(&self, slot: PipelineSlot) -> bool {
        self.0[slot.index()].read().is_some()
    }

    fn set(&self, slot: PipelineSlot, pipeline: Arc<dyn VideoPipeline>) {
        *self.0[slot.index()].write() = Some(pipeline);
    }

    fn take(&self, slot: PipelineSlot) -> SlotHandle {
        self.0[slot.index()].write().take()
    }
}

/// Result of [`ModelManager::clear_cache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Slots that held a pipeline
    pub released: usize,
    /// Released pipelines still borrowed by running requests
    pub in_flight: usize,
}

/// Per-slot load flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    #[serde(rename = "text-to-video")]
    pub text_to_video: bool,
    #[serde(rename = "image-to-video")]
    pub image_to_video: bool,
}

/// Snapshot of the manager for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatus {
    pub device: String,
    pub accelerator_available: bool,
    pub models: SlotStatus,
}

/// Process-wide pipeline cache
///
/// Constructed once by the composition root and shared as `Arc<ModelManager>`.
pub struct ModelManager {
    loader: Arc<dyn PipelineLoader>,
    device: DeviceContext,
    slots: Arc<Slots>,
    /// Serializes loads and clears
    lock: Arc<Mutex<()>>,
}

impl ModelManager {
    pub fn new(loader: Arc<dyn PipelineLoader>, device: DeviceContext) -> Self {
        Self {
            loader,
            device,
            slots: Arc::new(Slots::default()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Current execution device
    ///
    /// Falls back to CPU (permanently) if the accelerator became unreachable.
    pub fn device(&self) -> InferenceDevice {
        self.device.current()
    }

    pub fn device_context(&self) -> &DeviceContext {
        &self.device
    }

    /// Non-blocking check whether `slot` holds a pipeline
    pub fn is_loaded(&self, slot: PipelineSlot) -> bool {
        self.slots.is_set(slot)
    }

    /// Return the pipeline for `slot`, loading `model_id` on first use
    ///
    /// At most one load runs at a time. Callers racing on a cold slot wait
    /// for the single load and receive the same handle. A failed load is
    /// returned to the caller that ran it and leaves the slot empty, so the
    /// next call retries.
    pub async fn get_pipeline(
        &self,
        slot: PipelineSlot,
        model_id: &str,
    ) -> Result<Arc<dyn VideoPipeline>> {
        if let Some(pipeline) = self.slots.get(slot) {
            return Ok(pipeline);
        }

        let guard = Arc::clone(&self.lock).lock_owned().await;

        if let Some(pipeline) = self.slots.get(slot) {
            debug!(slot = %slot, "Pipeline loaded by a concurrent request");
            return Ok(pipeline);
        }

        let device = self.device();
        let request = LoadRequest {
            slot,
            model_id: model_id.to_string(),
            device,
            precision: device.precision(),
        };

        info!(
            slot = %slot,
            model = %model_id,
            device = %device,
            precision = %request.precision,
            "Loading pipeline"
        );

        let loader = Arc::clone(&self.loader);
        let slots = Arc::clone(&self.slots);
        let started = Instant::now();

        // The guard moves into the load task so a caller that goes away
        // mid-load cannot release the lock before the slot is filled.
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let pipeline = loader.load(&request)?;
            slots.set(request.slot, Arc::clone(&pipeline));
            Ok::<_, Error>(pipeline)
        });

        let pipeline = task
            .await
            .map_err(|e| Error::model_load(model_id, format!("load task failed: {}", e)))?
            .map_err(|e| {
                warn!(slot = %slot, model = %model_id, error = %e, "Pipeline load failed");
                e
            })?;

        info!(
            slot = %slot,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline loaded"
        );
        Ok(pipeline)
    }

    /// Drop both pipelines and release device memory
    ///
    /// Safe to call when nothing is loaded.
    pub async fn clear_cache(&self) -> ClearReport {
        let _guard = self.lock.lock().await;

        let mut report = ClearReport::default();
        for slot in PipelineSlot::ALL {
            if let Some(pipeline) = self.slots.take(slot) {
                report.released += 1;
                if Arc::strong_count(&pipeline) > 1 {
                    report.in_flight += 1;
                    debug!(slot = %slot, "Released pipeline is still in use by a request");
                }
            }
        }

        self.device.release_memory();
        info!(
            released = report.released,
            in_flight = report.in_flight,
            "Model cache cleared"
        );
        report
    }

    /// Best-effort reclamation after an out-of-memory failure
    ///
    /// Cached pipelines stay loaded.
    pub fn release_device_memory(&self) {
        warn!(device = %self.device(), "Releasing device memory after allocation failure");
        self.device.release_memory();
    }

    /// Snapshot for health endpoints
    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            device: self.device().to_string(),
            accelerator_available: self.device.accelerator_available(),
            models: SlotStatus {
                text_to_video: self.is_loaded(PipelineSlot::TextToVideo),
                image_to_video: self.is_loaded(PipelineSlot::ImageToVideo),
            },
        }
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("device", &self.device)
            .field("text_to_video", &self.is_loaded(PipelineSlot::TextToVideo))
            .field("image_to_video", &self.is_loaded(PipelineSlot::ImageToVideo))
            .finish()
    }
}
