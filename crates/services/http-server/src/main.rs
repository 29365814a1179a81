//! HTTP server binary entry point
//!
//! Starts the videogen text/image-to-video service.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (0.0.0.0:8000, prefix /lightricks-api)
//! cargo run -p videogen-http-server
//!
//! # Point at a MinIO deployment
//! MINIO_ENDPOINT=minio.local:9000 MINIO_ACCESS_KEY=... MINIO_SECRET_KEY=... \
//!   MINIO_BUCKET=videos MINIO_URL=cdn.example.com cargo run -p videogen-http-server
//!
//! # With logging
//! RUST_LOG=debug cargo run -p videogen-http-server
//! ```
//!
//! Every flag can also be set through the environment variable named in
//! `--help`. Missing storage settings only produce a warning unless
//! `STRICT_CONFIG=true`.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use videogen_core::config::{DEFAULT_API_PREFIX, DEFAULT_MODEL_ID, DEFAULT_REGION, DEFAULT_STORAGE_PREFIX};
use videogen_core::{
    Accelerator, DeviceContext, DeviceSelector, FfmpegExporter, GenerationDefaults,
    GenerationOptions, GenerationService, ImageLoader, ModelManager, ObjectStorage, PipelineSlot,
    ProceduralLoader, Settings, StorageConfig, StorageGateway, SystemAccelerator,
};
use videogen_http::HttpServer;

/// Videogen HTTP Server
///
/// Generates short videos from text prompts or seed images and uploads
/// them to S3-compatible object storage.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "0.0.0.0:8000", env = "HTTP_BIND_ADDRESS")]
    bind_address: String,

    /// Route prefix for generation endpoints
    #[arg(long, default_value = DEFAULT_API_PREFIX, env = "API_PREFIX")]
    api_prefix: String,

    /// S3 API endpoint of the MinIO deployment
    #[arg(long, env = "MINIO_ENDPOINT")]
    minio_endpoint: Option<String>,

    /// MinIO access key
    #[arg(long, env = "MINIO_ACCESS_KEY", hide_env_values = true)]
    minio_access_key: Option<String>,

    /// MinIO secret key
    #[arg(long, env = "MINIO_SECRET_KEY", hide_env_values = true)]
    minio_secret_key: Option<String>,

    /// Bucket videos are uploaded to
    #[arg(long, env = "MINIO_BUCKET")]
    minio_bucket: Option<String>,

    /// Public host used in returned URLs
    #[arg(long, env = "MINIO_URL")]
    minio_url: Option<String>,

    /// Object key prefix
    #[arg(long, default_value = DEFAULT_STORAGE_PREFIX, env = "MINIO_PREFIX")]
    minio_prefix: String,

    /// Storage region
    #[arg(long, default_value = DEFAULT_REGION, env = "MINIO_REGION")]
    minio_region: String,

    /// Allow plain HTTP storage endpoints
    #[arg(long, env = "MINIO_ALLOW_HTTP")]
    minio_allow_http: bool,

    /// Model identifier
    #[arg(long, default_value = DEFAULT_MODEL_ID, env = "MODEL_ID")]
    model_id: String,

    /// Default video width
    #[arg(long, default_value_t = 704, env = "DEFAULT_WIDTH")]
    default_width: u32,

    /// Default video height
    #[arg(long, default_value_t = 480, env = "DEFAULT_HEIGHT")]
    default_height: u32,

    /// Default number of frames
    #[arg(long, default_value_t = 161, env = "DEFAULT_NUM_FRAMES")]
    default_num_frames: u32,

    /// Default frames per second
    #[arg(long, default_value_t = 24, env = "DEFAULT_FPS")]
    default_fps: u32,

    /// Default number of inference steps
    #[arg(long, default_value_t = 30, env = "DEFAULT_INFERENCE_STEPS")]
    default_inference_steps: u32,

    /// Default guidance scale
    #[arg(long, default_value_t = 7.5, env = "DEFAULT_GUIDANCE_SCALE")]
    default_guidance_scale: f32,

    /// Inference device: auto, cpu, cuda, cuda:N
    #[arg(long, default_value = "auto", env = "INFERENCE_DEVICE")]
    device: String,

    /// Reject generation requests when no accelerator is reachable
    #[arg(long, env = "REQUIRE_ACCELERATOR")]
    require_accelerator: bool,

    /// Deadline for a single generation in seconds
    #[arg(long, env = "GENERATION_TIMEOUT_SECS")]
    generation_timeout_secs: Option<u64>,

    /// Directory for temporary video files (default: system temp dir)
    #[arg(long, env = "OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// ffmpeg executable used to encode videos
    #[arg(long, default_value = "ffmpeg", env = "FFMPEG_PATH")]
    ffmpeg_path: PathBuf,

    /// Accept local paths and file:// URLs as image_url
    #[arg(long, env = "ALLOW_LOCAL_IMAGES")]
    allow_local_images: bool,

    /// Refuse to start when storage settings are missing
    #[arg(long, env = "STRICT_CONFIG")]
    strict_config: bool,

    /// Load the text-to-video pipeline before accepting requests
    #[arg(long, env = "PRELOAD_MODELS")]
    preload_models: bool,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            api_prefix: self.api_prefix.clone(),
            model_id: self.model_id.clone(),
            device: self.device.clone(),
            require_accelerator: self.require_accelerator,
            generation_timeout: self
                .generation_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            output_dir: self.output_dir.clone().unwrap_or_else(std::env::temp_dir),
            ffmpeg_path: self.ffmpeg_path.clone(),
            allow_local_images: self.allow_local_images,
            strict_config: self.strict_config,
            preload_models: self.preload_models,
            storage: StorageConfig {
                endpoint: self.minio_endpoint.clone(),
                access_key: self.minio_access_key.clone(),
                secret_key: self.minio_secret_key.clone(),
                bucket: self.minio_bucket.clone(),
                public_url: self.minio_url.clone(),
                prefix: self.minio_prefix.clone(),
                region: self.minio_region.clone(),
                allow_http: self.minio_allow_http,
            },
            defaults: GenerationDefaults {
                width: self.default_width,
                height: self.default_height,
                num_frames: self.default_num_frames,
                fps: self.default_fps,
                num_inference_steps: self.default_inference_steps,
                guidance_scale: self.default_guidance_scale,
            },
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// An explicitly configured CUDA device must not silently run on CPU
fn is_explicit_accelerator(device: &str) -> bool {
    let device = device.trim().to_lowercase();
    device == "cuda" || device == "gpu" || device.starts_with("cuda:")
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let settings = args.settings();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %args.bind_address,
        api_prefix = %settings.normalized_prefix(),
        model = %settings.model_id,
        "Videogen HTTP Server starting"
    );

    if let Err(e) = settings.validate() {
        if settings.strict_config {
            error!("{}", e);
            return Err(e).context("refusing to start with incomplete configuration");
        }
        warn!("{}; uploads will fail until storage is configured", e);
    }

    // Create tokio runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("videogen-http")
        .enable_all()
        .build()?;

    runtime.block_on(run(args.bind_address.clone(), settings))?;

    info!("HTTP server shutdown complete");
    Ok(())
}

async fn run(bind_address: String, settings: Settings) -> anyhow::Result<()> {
    let accelerator: Arc<dyn Accelerator> = Arc::new(SystemAccelerator);
    let device = DeviceSelector::from_config(&settings.device, accelerator.as_ref())
        .context("invalid inference device")?;
    let require_accelerator =
        settings.require_accelerator || is_explicit_accelerator(&settings.device);
    let context =
        DeviceContext::new(device, accelerator).with_required_accelerator(require_accelerator);
    info!(device = %device, require_accelerator, "Inference device selected");

    let manager = Arc::new(ModelManager::new(Arc::new(ProceduralLoader::new()), context));

    let storage = Arc::new(
        ObjectStorage::from_config(&settings.storage).context("invalid storage configuration")?,
    );
    if storage.is_configured() {
        if storage.probe().await {
            info!("Object storage reachable");
        } else {
            warn!("Object storage is configured but not reachable");
        }
    }

    if settings.preload_models {
        match manager
            .get_pipeline(PipelineSlot::TextToVideo, &settings.model_id)
            .await
        {
            Ok(_) => info!("Text-to-video pipeline preloaded"),
            Err(e) => warn!("Preload failed, loading on first request instead: {}", e),
        }
    }

    let exporter = FfmpegExporter::new(&settings.ffmpeg_path);
    info!(
        ffmpeg = %exporter.binary().display(),
        allow_local_images = settings.allow_local_images,
        "Video export configured"
    );

    let service = Arc::new(GenerationService::new(
        Arc::clone(&manager),
        storage,
        Arc::new(exporter),
        ImageLoader::new()?.with_local_files(settings.allow_local_images),
        GenerationOptions::from(&settings),
    ));

    let server = HttpServer::new(bind_address, service, settings.normalized_prefix());

    info!("HTTP server ready - listening for connections");

    let served = server.serve_with_shutdown(shutdown_signal()).await;

    // Release models whether the server stopped cleanly or not
    let report = manager.clear_cache().await;
    info!(released = report.released, "Models released");

    served.map_err(|e| {
        error!("Server error: {}", e);
        e.into()
    })
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["http-server"]).unwrap();
        let settings = args.settings();
        assert_eq!(args.bind_address, "0.0.0.0:8000");
        assert_eq!(settings.normalized_prefix(), "lightricks-api");
        assert_eq!(settings.defaults, GenerationDefaults::default());
        assert_eq!(settings.storage.prefix, "generated-videos/");
        assert_eq!(settings.generation_timeout, None);
        assert!(!settings.allow_local_images);
    }

    #[test]
    fn test_flags_override() {
        let args = Args::try_parse_from([
            "http-server",
            "--minio-bucket",
            "videos",
            "--generation-timeout-secs",
            "120",
            "--strict-config",
            "--default-fps",
            "30",
            "--allow-local-images",
        ])
        .unwrap();
        let settings = args.settings();
        assert_eq!(settings.storage.bucket.as_deref(), Some("videos"));
        assert_eq!(settings.generation_timeout, Some(Duration::from_secs(120)));
        assert!(settings.strict_config);
        assert_eq!(settings.defaults.fps, 30);
        assert!(settings.allow_local_images);
    }

    #[test]
    fn test_explicit_accelerator() {
        assert!(is_explicit_accelerator("cuda"));
        assert!(is_explicit_accelerator("CUDA:1"));
        assert!(!is_explicit_accelerator("auto"));
        assert!(!is_explicit_accelerator("cpu"));
    }
}
