//! Service settings
//!
//! The server binary fills [`Settings`] from CLI flags and environment
//! variables; everything below it only ever sees this plain struct.

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default HuggingFace model identifier
pub const DEFAULT_MODEL_ID: &str = "Lightricks/LTX-Video";

/// Default route prefix for generation endpoints
pub const DEFAULT_API_PREFIX: &str = "lightricks-api";

/// Default object key prefix
pub const DEFAULT_STORAGE_PREFIX: &str = "generated-videos/";

/// Default storage region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Object storage connection settings
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// S3 API endpoint (`MINIO_ENDPOINT`), scheme optional
    pub endpoint: Option<String>,
    /// Access key (`MINIO_ACCESS_KEY`)
    pub access_key: Option<String>,
    /// Secret key (`MINIO_SECRET_KEY`)
    pub secret_key: Option<String>,
    /// Bucket name (`MINIO_BUCKET`)
    pub bucket: Option<String>,
    /// Public host used to build returned URLs (`MINIO_URL`)
    pub public_url: Option<String>,
    /// Object key prefix (`MINIO_PREFIX`)
    pub prefix: String,
    /// Region (`MINIO_REGION`)
    pub region: String,
    /// Allow plain HTTP endpoints (`MINIO_ALLOW_HTTP`)
    pub allow_http: bool,
}

impl StorageConfig {
    /// Environment variable names of required settings that are unset or blank
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let required = [
            ("MINIO_ENDPOINT", &self.endpoint),
            ("MINIO_ACCESS_KEY", &self.access_key),
            ("MINIO_SECRET_KEY", &self.secret_key),
            ("MINIO_BUCKET", &self.bucket),
            ("MINIO_URL", &self.public_url),
        ];

        required
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| name)
            .collect()
    }
}

/// Defaults applied to request fields the client leaves out
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationDefaults {
    pub width: u32,
    pub height: u32,
    pub num_frames: u32,
    pub fps: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            width: 704,
            height: 480,
            num_frames: 161,
            fps: 24,
            num_inference_steps: 30,
            guidance_scale: 7.5,
        }
    }
}

/// Complete service settings
#[derive(Debug, Clone)]
pub struct Settings {
    /// Route prefix for generation endpoints (without slashes)
    pub api_prefix: String,
    /// Model identifier passed to the pipeline loader
    pub model_id: String,
    /// Device selection: "auto", "cpu", "cuda", "cuda:N"
    pub device: String,
    /// Reject generation with 503 when no accelerator is reachable
    pub require_accelerator: bool,
    /// Upper bound on a single generation call
    pub generation_timeout: Option<Duration>,
    /// Directory for transient video files
    pub output_dir: PathBuf,
    /// ffmpeg executable used for export
    pub ffmpeg_path: PathBuf,
    /// Accept local paths and `file://` URLs as `image_url`
    pub allow_local_images: bool,
    /// Refuse to start when storage settings are missing
    pub strict_config: bool,
    /// Load the text-to-video pipeline during startup
    pub preload_models: bool,
    /// Object storage settings
    pub storage: StorageConfig,
    /// Request defaults
    pub defaults: GenerationDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            device: "auto".to_string(),
            require_accelerator: false,
            generation_timeout: None,
            output_dir: std::env::temp_dir(),
            ffmpeg_path: PathBuf::from("ffmpeg"),
            allow_local_images: false,
            strict_config: false,
            preload_models: false,
            storage: StorageConfig {
                prefix: DEFAULT_STORAGE_PREFIX.to_string(),
                region: DEFAULT_REGION.to_string(),
                ..StorageConfig::default()
            },
            defaults: GenerationDefaults::default(),
        }
    }
}

impl Settings {
    /// Check that required storage settings are present
    pub fn validate(&self) -> Result<()> {
        let missing = self.storage.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration(missing))
        }
    }

    /// Route prefix with surrounding slashes removed
    pub fn normalized_prefix(&self) -> &str {
        self.api_prefix.trim_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_storage() -> StorageConfig {
        StorageConfig {
            endpoint: Some("minio.local:9000".into()),
            access_key: Some("access".into()),
            secret_key: Some("secret".into()),
            bucket: Some("videos".into()),
            public_url: Some("cdn.example.com".into()),
            prefix: DEFAULT_STORAGE_PREFIX.into(),
            region: DEFAULT_REGION.into(),
            allow_http: false,
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.model_id, "Lightricks/LTX-Video");
        assert_eq!(settings.defaults.width, 704);
        assert_eq!(settings.defaults.height, 480);
        assert_eq!(settings.defaults.num_frames, 161);
        assert_eq!(settings.defaults.fps, 24);
        assert_eq!(settings.defaults.num_inference_steps, 30);
        assert_eq!(settings.defaults.guidance_scale, 7.5);
        assert_eq!(settings.storage.prefix, "generated-videos/");
        assert!(!settings.allow_local_images);
    }

    #[test]
    fn test_missing_storage_fields_reported() {
        let mut settings = Settings::default();
        settings.storage = complete_storage();
        assert!(settings.validate().is_ok());

        settings.storage.bucket = None;
        settings.storage.secret_key = Some("   ".into());
        match settings.validate() {
            Err(Error::Configuration { missing }) => {
                assert_eq!(missing, vec!["MINIO_SECRET_KEY", "MINIO_BUCKET"]);
            }
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_prefix_normalization() {
        let settings = Settings {
            api_prefix: "/lightricks-api/".into(),
            ..Settings::default()
        };
        assert_eq!(settings.normalized_prefix(), "lightricks-api");
    }
}
