//! Procedural pipeline backend
//!
//! Renders animated gradient patterns instead of running a diffusion model.
//! It honours the full pipeline contract (seeded determinism, per-output
//! sequences, seed-image conditioning, cancellation and a device memory
//! budget) so the service can be exercised end to end on machines without
//! a diffusion runtime.

use super::{
    CancelFlag, Frame, FrameSequence, GenerationInput, LoadRequest, PipelineLoader, VideoPipeline,
};
use crate::device::{InferenceDevice, Precision};
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

/// Frame memory a single generation call may use (16 GiB)
pub const DEFAULT_MEMORY_BUDGET: u64 = 16 * 1024 * 1024 * 1024;

/// Loader for [`ProceduralPipeline`]
#[derive(Debug, Clone)]
pub struct ProceduralLoader {
    memory_budget: u64,
}

impl ProceduralLoader {
    pub fn new() -> Self {
        Self {
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }

    /// Cap the frame memory of one call; larger requests fail with out-of-memory
    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }
}

impl Default for ProceduralLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineLoader for ProceduralLoader {
    fn load(&self, request: &LoadRequest) -> Result<Arc<dyn VideoPipeline>> {
        if request.model_id.trim().is_empty() {
            return Err(Error::model_load(&request.model_id, "model identifier is empty"));
        }

        info!(
            slot = %request.slot,
            model = %request.model_id,
            device = %request.device,
            precision = %request.precision,
            "Initializing procedural pipeline"
        );

        Ok(Arc::new(ProceduralPipeline {
            model_id: request.model_id.clone(),
            device: request.device,
            precision: request.precision,
            memory_budget: self.memory_budget,
        }))
    }
}

/// Deterministic pattern generator standing in for a diffusion model
#[derive(Debug)]
pub struct ProceduralPipeline {
    model_id: String,
    device: InferenceDevice,
    precision: Precision,
    memory_budget: u64,
}

/// Per-video pattern parameters drawn from the RNG
struct Pattern {
    base: [u8; 3],
    dx: u32,
    dy: u32,
    speed: u32,
    phase: u32,
}

impl Pattern {
    fn draw(rng: &mut StdRng) -> Self {
        Self {
            base: rng.gen(),
            dx: rng.gen_range(1..8),
            dy: rng.gen_range(1..8),
            speed: rng.gen_range(1..16),
            phase: rng.gen(),
        }
    }

    fn pixel(&self, x: u32, y: u32, t: u32) -> [u8; 3] {
        let v = x
            .wrapping_mul(self.dx)
            .wrapping_add(y.wrapping_mul(self.dy))
            .wrapping_add(t.wrapping_mul(self.speed))
            .wrapping_add(self.phase) as u8;
        [
            self.base[0].wrapping_add(v),
            self.base[1].wrapping_add(v >> 1),
            self.base[2] ^ v,
        ]
    }
}

impl ProceduralPipeline {
    fn render(
        pattern: &Pattern,
        width: u32,
        height: u32,
        t: u32,
        total: u32,
        image: Option<&Frame>,
    ) -> Frame {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        // Seed image fades into the pattern over the clip
        let weight = image.map(|_| (total.saturating_sub(1).saturating_sub(t), total.saturating_sub(1).max(1)));

        for y in 0..height {
            for x in 0..width {
                let generated = pattern.pixel(x, y, t);
                match (image, weight) {
                    (Some(img), Some((w, denom))) => {
                        let offset = ((y * width + x) * 3) as usize;
                        for c in 0..3 {
                            let src = img.data[offset + c] as u32;
                            let gen = generated[c] as u32;
                            data.push(((src * w + gen * (denom - w)) / denom) as u8);
                        }
                    }
                    _ => data.extend_from_slice(&generated),
                }
            }
        }

        Frame {
            width,
            height,
            data,
        }
    }
}

impl VideoPipeline for ProceduralPipeline {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn device(&self) -> InferenceDevice {
        self.device
    }

    fn generate(&self, input: &GenerationInput, cancel: &CancelFlag) -> Result<Vec<FrameSequence>> {
        let params = &input.params;

        let required = params.frame_bytes_per_video() * params.num_videos as u64;
        if required > self.memory_budget {
            return Err(Error::OutOfMemory(format!(
                "{} bytes of frames requested on {}, budget is {} bytes",
                required, self.device, self.memory_budget
            )));
        }

        let image = match &input.image {
            Some(img) if img.width == params.width && img.height == params.height => Some(img),
            Some(img) => {
                return Err(Error::InvalidInput(format!(
                    "seed image is {}x{}, expected {}x{}",
                    img.width, img.height, params.width, params.height
                )))
            }
            None => None,
        };

        debug!(
            model = %self.model_id,
            precision = %self.precision,
            num_videos = params.num_videos,
            "Rendering procedural frames"
        );

        let prompt_key = fnv1a(params.prompt.as_bytes());
        let mut outputs = Vec::with_capacity(params.num_videos as usize);

        for index in 0..params.num_videos {
            let mut rng = match params.seed {
                Some(seed) => StdRng::seed_from_u64(seed ^ prompt_key.wrapping_add(index as u64)),
                None => StdRng::from_entropy(),
            };
            let pattern = Pattern::draw(&mut rng);

            let mut frames = Vec::with_capacity(params.num_frames as usize);
            for t in 0..params.num_frames {
                if cancel.is_cancelled() {
                    debug!(video = index, frame = t, "Generation cancelled");
                    return Err(Error::Cancelled);
                }
                frames.push(Self::render(
                    &pattern,
                    params.width,
                    params.height,
                    t,
                    params.num_frames,
                    image,
                ));
            }
            outputs.push(FrameSequence::new(frames));
        }

        Ok(outputs)
    }
}

/// FNV-1a, stable across processes unlike `DefaultHasher`
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ *b as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
