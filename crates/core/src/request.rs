//! Generation request bodies and their normalized form
//!
//! Requests arrive with most numeric fields optional. [`GenerationRequest::normalize`]
//! fills gaps from the configured defaults and range-checks every field,
//! collecting all violations so the client sees them in one response.

use crate::config::GenerationDefaults;
use crate::error::{Error, FieldError, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Width and height must be multiples of this stride
pub const SIZE_STRIDE: u32 = 8;

/// Inclusive bounds for every numeric request field
pub mod limits {
    use std::ops::RangeInclusive;

    pub const WIDTH: RangeInclusive<u32> = 64..=1280;
    pub const HEIGHT: RangeInclusive<u32> = 64..=720;
    pub const NUM_FRAMES: RangeInclusive<u32> = 1..=300;
    pub const FPS: RangeInclusive<u32> = 1..=60;
    pub const INFERENCE_STEPS: RangeInclusive<u32> = 1..=100;
    pub const GUIDANCE_SCALE: RangeInclusive<f32> = 1.0..=20.0;
    pub const VIDEOS_PER_PROMPT: RangeInclusive<u32> = 1..=4;
}

/// Text-to-video request body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Text prompt describing the video to generate
    pub prompt: String,

    /// Things to avoid in the generation
    #[serde(default)]
    pub negative_prompt: Option<String>,

    /// Video width (multiple of 8)
    #[serde(default)]
    pub width: Option<u32>,

    /// Video height (multiple of 8)
    #[serde(default)]
    pub height: Option<u32>,

    /// Number of frames to generate
    #[serde(default)]
    pub num_frames: Option<u32>,

    /// Frames per second for the output video
    #[serde(default)]
    pub fps: Option<u32>,

    /// Diffusion steps
    #[serde(default)]
    pub num_inference_steps: Option<u32>,

    /// Prompt guidance strength
    #[serde(default)]
    pub guidance_scale: Option<f32>,

    /// Number of videos to generate
    #[serde(default)]
    pub num_videos_per_prompt: Option<u32>,

    /// Random seed for reproducible output; 0 or absent means random
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Image-to-video request body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    /// Input image used as the first frame (http(s) URL or local path)
    pub image_url: String,

    #[serde(flatten)]
    pub generation: GenerationRequest,
}

/// Fully resolved, range-checked generation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    pub fps: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub num_videos: u32,
    /// Present only for positive seeds
    pub seed: Option<u64>,
}

impl GenerationParams {
    /// Raw RGB bytes one output video occupies in memory
    pub fn frame_bytes_per_video(&self) -> u64 {
        self.width as u64 * self.height as u64 * 3 * self.num_frames as u64
    }
}

impl GenerationRequest {
    /// Minimal request with only a prompt
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Apply defaults and validate every field
    pub fn normalize(&self, defaults: &GenerationDefaults) -> Result<GenerationParams> {
        let mut errors = Vec::new();

        let prompt = self.prompt.trim();
        if prompt.is_empty() {
            errors.push(FieldError::new("prompt", "must not be empty"));
        }

        let width = self.width.unwrap_or(defaults.width);
        check_range(&mut errors, "width", width, &limits::WIDTH);
        check_stride(&mut errors, "width", width);

        let height = self.height.unwrap_or(defaults.height);
        check_range(&mut errors, "height", height, &limits::HEIGHT);
        check_stride(&mut errors, "height", height);

        let num_frames = self.num_frames.unwrap_or(defaults.num_frames);
        check_range(&mut errors, "num_frames", num_frames, &limits::NUM_FRAMES);

        let fps = self.fps.unwrap_or(defaults.fps);
        check_range(&mut errors, "fps", fps, &limits::FPS);

        let num_inference_steps = self
            .num_inference_steps
            .unwrap_or(defaults.num_inference_steps);
        check_range(
            &mut errors,
            "num_inference_steps",
            num_inference_steps,
            &limits::INFERENCE_STEPS,
        );

        let guidance_scale = self.guidance_scale.unwrap_or(defaults.guidance_scale);
        check_range(
            &mut errors,
            "guidance_scale",
            guidance_scale,
            &limits::GUIDANCE_SCALE,
        );

        let num_videos = self.num_videos_per_prompt.unwrap_or(1);
        check_range(
            &mut errors,
            "num_videos_per_prompt",
            num_videos,
            &limits::VIDEOS_PER_PROMPT,
        );

        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }

        Ok(GenerationParams {
            prompt: prompt.to_string(),
            negative_prompt: self
                .negative_prompt
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            width,
            height,
            num_frames,
            fps,
            num_inference_steps,
            guidance_scale,
            num_videos,
            seed: self.seed.filter(|s| *s > 0),
        })
    }
}

impl ImageGenerationRequest {
    /// Validate the image reference alongside the shared fields
    pub fn normalize(&self, defaults: &GenerationDefaults) -> Result<GenerationParams> {
        let image_missing = self.image_url.trim().is_empty();

        match self.generation.normalize(defaults) {
            Ok(params) if !image_missing => Ok(params),
            Ok(_) => Err(Error::Validation(vec![image_url_error()])),
            Err(Error::Validation(mut errors)) => {
                if image_missing {
                    errors.insert(0, image_url_error());
                }
                Err(Error::Validation(errors))
            }
            Err(other) => Err(other),
        }
    }
}

fn image_url_error() -> FieldError {
    FieldError::new("image_url", "must not be empty")
}

fn check_range<T>(errors: &mut Vec<FieldError>, field: &str, value: T, range: &RangeInclusive<T>)
where
    T: PartialOrd + std::fmt::Display,
{
    if !range.contains(&value) {
        errors.push(FieldError::new(
            field,
            format!(
                "must be between {} and {} (got {})",
                range.start(),
                range.end(),
                value
            ),
        ));
    }
}

fn check_stride(errors: &mut Vec<FieldError>, field: &str, value: u32) {
    if value % SIZE_STRIDE != 0 {
        errors.push(FieldError::new(
            field,
            format!("must be a multiple of {} (got {})", SIZE_STRIDE, value),
        ));
    }
}
