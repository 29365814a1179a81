//! HTTP/REST server implementation
//!
//! Provides HTTP endpoints for video generation:
//! - POST /{prefix}/txt2video - Generate one video from a prompt
//! - POST /{prefix}/txt2video/batch - Generate every requested video
//! - POST /{prefix}/img2video - Generate a video from a seed image
//! - POST /{prefix}/models/clear - Drop cached pipelines
//! - GET /health - Device and model status
//! - GET /health/minio - Object storage reachability
//! - GET / - Service information

use crate::error::{Error, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use videogen_core::{
    ClearReport, GenerationRequest, GenerationService, ImageGenerationRequest, ManagerStatus,
};

/// HTTP server state shared across handlers
#[derive(Clone)]
struct ServerState {
    /// Generation workflow, including the model manager
    service: Arc<GenerationService>,
    /// Generation routes, listed by the info endpoint
    endpoints: Arc<Vec<String>>,
}

/// HTTP server for the generation service
pub struct HttpServer {
    /// Server bind address
    bind_address: String,
    /// Route prefix for generation endpoints
    api_prefix: String,
    /// Shared generation service
    service: Arc<GenerationService>,
}

impl HttpServer {
    /// Create a new HTTP server
    ///
    /// # Arguments
    ///
    /// * `bind_address` - Address to bind to (e.g., "0.0.0.0:8000")
    /// * `service` - Generation service shared by all handlers
    /// * `api_prefix` - Route prefix for generation endpoints (e.g., "lightricks-api")
    pub fn new(
        bind_address: String,
        service: Arc<GenerationService>,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            bind_address,
            api_prefix: api_prefix.into(),
            service,
        }
    }

    /// Build the router with all endpoints
    pub fn router(&self) -> Router {
        build_router(Arc::clone(&self.service), &self.api_prefix)
    }

    /// Start the HTTP server
    ///
    /// This method blocks until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server, stopping gracefully once `signal` completes
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: std::net::SocketAddr = self.bind_address.parse().map_err(
            |e: std::net::AddrParseError| Error::InvalidBindAddress {
                address: self.bind_address.clone(),
                message: e.to_string(),
            },
        )?;

        tracing::info!("Starting HTTP server on {}", addr);

        let router = self.router();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Bind(addr.to_string(), e))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| Error::ServerError(format!("Server error: {}", e)))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the router for `service`, nesting generation routes under `api_prefix`
///
/// An empty prefix mounts the generation routes at the root.
pub fn build_router(service: Arc<GenerationService>, api_prefix: &str) -> Router {
    let prefix = api_prefix.trim_matches('/');
    let base = if prefix.is_empty() {
        String::new()
    } else {
        format!("/{}", prefix)
    };

    let endpoints: Vec<String> = [
        "txt2video",
        "txt2video/batch",
        "img2video",
        "models/clear",
    ]
    .iter()
    .map(|route| format!("{}/{}", base, route))
    .chain(["/health".to_string(), "/health/minio".to_string()])
    .collect();

    let state = ServerState {
        service,
        endpoints: Arc::new(endpoints),
    };

    let generation = Router::new()
        .route("/txt2video", post(txt2video_handler))
        .route("/txt2video/batch", post(txt2video_batch_handler))
        .route("/img2video", post(img2video_handler))
        .route("/models/clear", post(clear_models_handler));

    let router = Router::new()
        .route("/", get(info_handler))
        .route("/health", get(health_handler))
        .route("/health/minio", get(storage_health_handler));

    let router = if base.is_empty() {
        router.merge(generation)
    } else {
        router.nest(&base, generation)
    };

    router.with_state(state).layer(
        tower::ServiceBuilder::new()
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .layer(tower_http::cors::CorsLayer::permissive()),
    )
}

/// Error response body for structured error responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type (e.g., "validation", "storage", "out_of_memory")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
    /// Structured validation errors (only for validation errors)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<serde_json::Value>,
}

type HandlerError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error_type: &str, message: String) -> HandlerError {
    (
        status,
        Json(ErrorResponse {
            error_type: error_type.to_string(),
            message,
            validation_errors: None,
        }),
    )
}

/// Map core errors to appropriate HTTP status codes and structured responses
fn map_generation_error(kind: &str, e: videogen_core::Error) -> HandlerError {
    use videogen_core::Error as CoreError;

    let (status, error_type, message, validation_errors) = match e {
        CoreError::Validation(ref errors) => (
            StatusCode::BAD_REQUEST,
            "validation",
            e.to_string(),
            serde_json::to_value(errors).ok(),
        ),
        CoreError::InvalidInput(ref msg) => {
            (StatusCode::BAD_REQUEST, "input", msg.clone(), None)
        }
        CoreError::DeviceUnavailable { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "device_unavailable",
            e.to_string(),
            None,
        ),
        CoreError::OutOfMemory(_) => (
            StatusCode::INSUFFICIENT_STORAGE,
            "out_of_memory",
            e.to_string(),
            None,
        ),
        CoreError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            e.to_string(),
            None,
        ),
        CoreError::Storage(ref msg) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage",
            format!("MinIO error: {}", msg),
            None,
        ),
        CoreError::Configuration { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "configuration",
            e.to_string(),
            None,
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "generation",
            e.to_string(),
            None,
        ),
    };

    if status.is_server_error() {
        tracing::error!(kind, status = status.as_u16(), error = %message, "Request failed");
    } else {
        tracing::debug!(kind, status = status.as_u16(), error = %message, "Request rejected");
    }

    (
        status,
        Json(ErrorResponse {
            error_type: error_type.to_string(),
            message,
            validation_errors,
        }),
    )
}

/// Malformed or mistyped JSON bodies are client errors
fn map_rejection(rejection: JsonRejection) -> HandlerError {
    error_response(
        StatusCode::BAD_REQUEST,
        "input",
        format!("Invalid request body: {}", rejection.body_text()),
    )
}

// Handler implementations

/// Response body for single-video endpoints
#[derive(Debug, Serialize)]
struct GenerateResponse {
    message: String,
    url: String,
}

/// Response body for the batch endpoint
#[derive(Debug, Serialize)]
struct BatchResponse {
    message: String,
    urls: Vec<String>,
}

/// POST /{prefix}/txt2video
async fn txt2video_handler(
    State(state): State<ServerState>,
    payload: std::result::Result<Json<GenerationRequest>, JsonRejection>,
) -> std::result::Result<Json<GenerateResponse>, HandlerError> {
    let Json(request) = payload.map_err(map_rejection)?;

    let url = state
        .service
        .text_to_video(&request)
        .await
        .map_err(|e| map_generation_error("txt2video", e))?;

    Ok(Json(GenerateResponse {
        message: "Video generated and uploaded (txt2video)".to_string(),
        url,
    }))
}

/// POST /{prefix}/txt2video/batch
async fn txt2video_batch_handler(
    State(state): State<ServerState>,
    payload: std::result::Result<Json<GenerationRequest>, JsonRejection>,
) -> std::result::Result<Json<BatchResponse>, HandlerError> {
    let Json(request) = payload.map_err(map_rejection)?;

    let urls = state
        .service
        .text_to_video_batch(&request)
        .await
        .map_err(|e| map_generation_error("txt2video_batch", e))?;

    Ok(Json(BatchResponse {
        message: format!("{} video(s) generated and uploaded (txt2video)", urls.len()),
        urls,
    }))
}

/// POST /{prefix}/img2video
async fn img2video_handler(
    State(state): State<ServerState>,
    payload: std::result::Result<Json<ImageGenerationRequest>, JsonRejection>,
) -> std::result::Result<Json<GenerateResponse>, HandlerError> {
    let Json(request) = payload.map_err(map_rejection)?;

    let url = state
        .service
        .image_to_video(&request)
        .await
        .map_err(|e| map_generation_error("img2video", e))?;

    Ok(Json(GenerateResponse {
        message: "Video generated and uploaded (img2video)".to_string(),
        url,
    }))
}

/// Response body for POST /{prefix}/models/clear
#[derive(Debug, Serialize)]
struct ClearResponse {
    message: String,
    #[serde(flatten)]
    report: ClearReport,
}

/// POST /{prefix}/models/clear
async fn clear_models_handler(State(state): State<ServerState>) -> Json<ClearResponse> {
    let report = state.service.manager().clear_cache().await;
    Json(ClearResponse {
        message: "Model cache cleared".to_string(),
        report,
    })
}

/// Response body for GET /health
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    manager: ManagerStatus,
}

/// GET /health
async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        manager: state.service.manager().status(),
    })
}

/// Response body for GET /health/minio
#[derive(Debug, Serialize)]
struct StorageHealthResponse {
    minio_connected: bool,
}

/// GET /health/minio
async fn storage_health_handler(
    State(state): State<ServerState>,
) -> Json<StorageHealthResponse> {
    Json(StorageHealthResponse {
        minio_connected: state.service.storage().probe().await,
    })
}

/// Response body for GET /
#[derive(Debug, Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
    endpoints: Vec<String>,
}

/// GET /
async fn info_handler(State(state): State<ServerState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        name: "videogen",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: state.endpoints.as_ref().clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use videogen_core::FieldError;

    #[test]
    fn test_validation_maps_to_400_with_fields() {
        let (status, Json(body)) = map_generation_error(
            "txt2video",
            videogen_core::Error::Validation(vec![FieldError::new("fps", "must be between 1 and 60")]),
        );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body.error_type, "validation");
        let errors = body.validation_errors.unwrap();
        assert_eq!(errors[0]["field"], "fps");
    }

    #[test]
    fn test_status_mapping() {
        use videogen_core::Error as CoreError;

        let cases = [
            (CoreError::InvalidInput("bad image".into()), StatusCode::BAD_REQUEST),
            (
                CoreError::DeviceUnavailable {
                    device: "cuda:0".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (CoreError::OutOfMemory("cuda".into()), StatusCode::INSUFFICIENT_STORAGE),
            (CoreError::Timeout(Duration::from_secs(5)), StatusCode::GATEWAY_TIMEOUT),
            (
                CoreError::configuration(["MINIO_BUCKET"]),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (CoreError::Inference("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(map_generation_error("test", error).0, expected);
        }
    }

    #[test]
    fn test_storage_message_prefixed() {
        let (status, Json(body)) = map_generation_error(
            "txt2video",
            videogen_core::Error::Storage("bucket missing".into()),
        );
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body.message, "MinIO error: bucket missing");
        assert!(body.validation_errors.is_none());
    }
}
