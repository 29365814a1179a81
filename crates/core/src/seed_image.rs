//! Seed image loading for image-to-video

use crate::error::{Error, Result};
use crate::pipeline::Frame;
use ::image::imageops::FilterType;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Fetch timeout for remote images
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a fetched image body (32 MiB)
pub const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Resolves an image reference to an RGB frame at the output size
#[derive(Debug, Clone)]
pub struct ImageLoader {
    client: reqwest::Client,
    allow_local: bool,
}

enum ImageSource {
    Remote(Url),
    Local(PathBuf),
}

impl ImageLoader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            allow_local: false,
        }
    }

    /// Accept local paths and `file://` URLs as image sources
    ///
    /// Off by default: request bodies come from untrusted clients.
    pub fn with_local_files(mut self, allow: bool) -> Self {
        self.allow_local = allow;
        self
    }

    /// Load `source` and resize it to `width` x `height`
    ///
    /// `source` is an http(s) URL, or a `file://` URL or local path when
    /// local files are enabled. Every failure (unreachable, too large, not
    /// an image, unsupported scheme) is an [`Error::InvalidInput`].
    pub async fn load(&self, source: &str, width: u32, height: u32) -> Result<Frame> {
        let bytes = match parse_source(source)? {
            ImageSource::Remote(url) => self.fetch(url).await?,
            ImageSource::Local(_) if !self.allow_local => {
                return Err(Error::InvalidInput(
                    "image_url must be an http(s) URL".to_string(),
                ))
            }
            ImageSource::Local(path) => tokio::fs::read(&path).await.map_err(|e| {
                Error::InvalidInput(format!("cannot read image {}: {}", path.display(), e))
            })?,
        };

        debug!(source = %source, bytes = bytes.len(), "Decoding seed image");
        tokio::task::spawn_blocking(move || decode_resized(&bytes, width, height))
            .await
            .map_err(|e| Error::InvalidInput(format!("image decode task failed: {}", e)))?
    }

    async fn fetch(&self, url: Url) -> Result<Vec<u8>> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::InvalidInput(format!("cannot fetch image {}: {}", url, e)))?;

        if let Some(declared) = response.content_length() {
            if declared > MAX_IMAGE_BYTES as u64 {
                return Err(too_large(&url));
            }
        }

        // Read chunk by chunk so an oversized body is dropped at the limit
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::InvalidInput(format!("cannot read image {}: {}", url, e)))?
        {
            if body.len() + chunk.len() > MAX_IMAGE_BYTES {
                return Err(too_large(&url));
            }
            body.extend_from_slice(&chunk);
        }

        info!(url = %url, bytes = body.len(), "Fetched seed image");
        Ok(body)
    }
}

fn too_large(url: &Url) -> Error {
    Error::InvalidInput(format!(
        "image {} exceeds the {} byte limit",
        url, MAX_IMAGE_BYTES
    ))
}

fn parse_source(source: &str) -> Result<ImageSource> {
    let source = source.trim();
    match Url::parse(source) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(ImageSource::Remote(url)),
            "file" => url
                .to_file_path()
                .map(ImageSource::Local)
                .map_err(|_| Error::InvalidInput(format!("invalid file URL: {}", source))),
            scheme => Err(Error::InvalidInput(format!(
                "unsupported image URL scheme '{}'",
                scheme
            ))),
        },
        // Windows drive letters parse as a scheme; anything unparseable is a path
        Err(_) => Ok(ImageSource::Local(PathBuf::from(source))),
    }
}

/// Decode any supported image format into an RGB frame of the given size
pub fn decode_resized(bytes: &[u8], width: u32, height: u32) -> Result<Frame> {
    let decoded = ::image::load_from_memory(bytes)
        .map_err(|e| Error::InvalidInput(format!("cannot decode image: {}", e)))?;

    let rgb = if decoded.width() == width && decoded.height() == height {
        decoded.to_rgb8()
    } else {
        decoded
            .resize_exact(width, height, FilterType::Triangle)
            .to_rgb8()
    };

    Frame::from_rgb(width, height, rgb.into_raw())
}
