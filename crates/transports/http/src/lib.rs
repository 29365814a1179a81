//! HTTP/REST transport for the videogen service
//!
//! # Endpoints
//!
//! - **Text-to-video**: POST /{prefix}/txt2video
//! - **Batch text-to-video**: POST /{prefix}/txt2video/batch
//! - **Image-to-video**: POST /{prefix}/img2video
//! - **Cache control**: POST /{prefix}/models/clear
//! - **Health checks**: GET /health, GET /health/minio
//! - **Service info**: GET /
//!
//! # Usage
//!
//! ```ignore
//! use videogen_http::HttpServer;
//!
//! let service = Arc::new(GenerationService::new(manager, storage, exporter, images, options));
//! let server = HttpServer::new("0.0.0.0:8000".to_string(), service, "lightricks-api");
//! server.serve_with_shutdown(shutdown_signal()).await?;
//! ```

pub mod error;
pub mod server;

// Re-export main types
pub use error::{Error, Result};
pub use server::{build_router, ErrorResponse, HttpServer};
