//! Storage gateway for generated videos
//!
//! Uploads artifacts to an S3-compatible bucket (MinIO in production) and
//! returns the public URL clients download from.

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{
    Attribute, AttributeValue, Attributes, ObjectStore, PutMultipartOpts, PutOptions, PutPayload,
    WriteMultipart,
};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

/// Content type attached to every uploaded video
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// Files above this size are streamed as a multipart upload
pub const MULTIPART_THRESHOLD: u64 = 8 * 1024 * 1024;

const MULTIPART_CHUNK_SIZE: usize = 8 * 1024 * 1024;
const MAX_CONCURRENT_PARTS: usize = 4;
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Upload contract used by the generation service
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Upload a local file and return its public URL
    ///
    /// Fails with [`Error::NotFound`] if the file does not exist,
    /// [`Error::Configuration`] if the gateway is not configured and
    /// [`Error::Storage`] if the remote write fails.
    async fn upload(&self, local_path: &Path) -> Result<String>;

    /// Connectivity check for diagnostics; never fails
    async fn probe(&self) -> bool;
}

/// Bucket location and URL layout
#[derive(Debug, Clone)]
struct BucketTarget {
    bucket: String,
    public_url: String,
    prefix: String,
}

enum Backend {
    Ready {
        store: Arc<dyn ObjectStore>,
        target: BucketTarget,
    },
    Unconfigured {
        missing: Vec<String>,
    },
}

/// [`StorageGateway`] backed by the `object_store` crate
pub struct ObjectStorage {
    backend: Backend,
}

impl ObjectStorage {
    /// Build an S3 client from settings
    ///
    /// Missing settings produce an unconfigured gateway whose uploads fail
    /// with a configuration error; an invalid endpoint fails immediately.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let missing = config.missing_fields();
        if !missing.is_empty() {
            warn!(missing = ?missing, "Object storage is not configured");
            return Ok(Self::unconfigured(missing));
        }

        // missing_fields() guarantees these are present
        let field = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();
        let endpoint = normalize_endpoint(&field(&config.endpoint));
        let bucket = field(&config.bucket);

        let allow_http = config.allow_http || endpoint.starts_with("http://");
        let store = AmazonS3Builder::new()
            .with_endpoint(&endpoint)
            .with_access_key_id(field(&config.access_key))
            .with_secret_access_key(field(&config.secret_key))
            .with_region(&config.region)
            .with_bucket_name(&bucket)
            // MinIO serves buckets path-style
            .with_virtual_hosted_style_request(false)
            .with_allow_http(allow_http)
            .build()?;

        info!(endpoint = %endpoint, bucket = %bucket, "Object storage configured");

        Ok(Self::with_store(
            Arc::new(store),
            bucket,
            field(&config.public_url),
            &config.prefix,
        ))
    }

    /// Gateway over an existing store (e.g. `object_store::memory::InMemory`)
    pub fn with_store(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        public_url: impl Into<String>,
        prefix: &str,
    ) -> Self {
        Self {
            backend: Backend::Ready {
                store,
                target: BucketTarget {
                    bucket: bucket.into(),
                    public_url: public_url.into(),
                    prefix: normalize_prefix(prefix),
                },
            },
        }
    }

    /// Gateway that rejects every upload with a configuration error
    pub fn unconfigured<I, S>(missing: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            backend: Backend::Unconfigured {
                missing: missing.into_iter().map(Into::into).collect(),
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self.backend, Backend::Ready { .. })
    }

    fn ready(&self) -> Result<(&Arc<dyn ObjectStore>, &BucketTarget)> {
        match &self.backend {
            Backend::Ready { store, target } => Ok((store, target)),
            Backend::Unconfigured { missing } => Err(Error::configuration(missing.iter().cloned())),
        }
    }
}

impl BucketTarget {
    fn object_key(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    fn url_for(&self, key: &str) -> String {
        let host = self.public_url.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/{}/{}", host, self.bucket, key)
        } else {
            format!("https://{}/{}/{}", host, self.bucket, key)
        }
    }
}

#[async_trait]
impl StorageGateway for ObjectStorage {
    async fn upload(&self, local_path: &Path) -> Result<String> {
        let (store, target) = self.ready()?;

        let mut file = match tokio::fs::File::open(local_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(local_path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata().await?.len();

        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("Invalid artifact path: {}", local_path.display())))?;
        let key = target.object_key(file_name);
        let location = ObjectPath::from(key.as_str());

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(VIDEO_CONTENT_TYPE),
        );

        if size <= MULTIPART_THRESHOLD {
            let mut data = Vec::with_capacity(size as usize);
            file.read_to_end(&mut data).await?;
            let options = PutOptions {
                attributes,
                ..PutOptions::default()
            };
            store
                .put_opts(&location, PutPayload::from(data), options)
                .await?;
        } else {
            let options = PutMultipartOpts {
                attributes,
                ..PutMultipartOpts::default()
            };
            let upload = store.put_multipart_opts(&location, options).await?;
            let writer = WriteMultipart::new_with_chunk_size(upload, MULTIPART_CHUNK_SIZE);
            stream_file(&mut file, writer).await?;
        }

        let url = target.url_for(&key);
        info!(key = %key, bytes = size, url = %url, "Uploaded video");
        Ok(url)
    }

    async fn probe(&self) -> bool {
        let Ok((store, target)) = self.ready() else {
            return false;
        };

        let prefix = ObjectPath::from(target.prefix.trim_end_matches('/'));
        match store.list_with_delimiter(Some(&prefix)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(bucket = %target.bucket, error = %e, "Storage probe failed");
                false
            }
        }
    }
}

/// Copy a file into a multipart upload, aborting it on any failure
async fn stream_file(file: &mut tokio::fs::File, mut writer: WriteMultipart) -> Result<()> {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = match file.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) => {
                let _ = writer.abort().await;
                return Err(e.into());
            }
        };
        if let Err(e) = writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await {
            let _ = writer.abort().await;
            return Err(e.into());
        }
        writer.write(&buffer[..read]);
    }

    writer.finish().await?;
    Ok(())
}

/// Prefix the endpoint with https:// when no scheme is given
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("https://{}", endpoint)
    }
}

/// Key prefix with exactly one trailing slash, or empty
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
