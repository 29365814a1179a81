//! HTTP route tests
//!
//! Drives the full router with `tower::ServiceExt::oneshot`. The generation
//! stack is real except for two seams: frames are exported as raw bytes
//! instead of through ffmpeg, and uploads land in an in-memory object store.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use object_store::memory::InMemory;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tower::ServiceExt;
use videogen_core::{
    DeviceContext, FrameExporter, FrameSequence, GenerationOptions, GenerationService,
    ImageLoader, ModelManager, ObjectStorage, ProceduralLoader, Result, StorageGateway,
};
use videogen_http::build_router;

/// Writes raw frame bytes instead of encoding
struct RawExporter;

#[async_trait]
impl FrameExporter for RawExporter {
    async fn export(&self, frames: &FrameSequence, _fps: u32, path: &Path) -> Result<()> {
        let mut file = tokio::fs::File::create(path).await?;
        for frame in &frames.frames {
            file.write_all(&frame.data).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

struct TestApp {
    router: Router,
    output: TempDir,
}

impl TestApp {
    fn new() -> Self {
        Self::with_storage(
            Arc::new(ObjectStorage::with_store(
                Arc::new(InMemory::new()),
                "videos",
                "minio.example.com",
                "generated-videos/",
            )),
            "lightricks-api",
        )
    }

    fn with_storage(storage: Arc<dyn StorageGateway>, prefix: &str) -> Self {
        let output = tempfile::tempdir().unwrap();
        let manager = Arc::new(ModelManager::new(
            Arc::new(ProceduralLoader::new()),
            DeviceContext::cpu(),
        ));
        let options = GenerationOptions {
            output_dir: output.path().to_path_buf(),
            ..GenerationOptions::default()
        };
        let service = Arc::new(GenerationService::new(
            manager,
            storage,
            Arc::new(RawExporter),
            ImageLoader::new().unwrap(),
            options,
        ));
        Self {
            router: build_router(service, prefix),
            output,
        }
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.post_raw(uri, body.to_string()).await
    }

    async fn post_raw(&self, uri: &str, body: String) -> (StatusCode, Value) {
        self.send(
            Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn leftover_files(&self) -> usize {
        std::fs::read_dir(self.output.path()).unwrap().count()
    }
}

fn small_body(prompt: &str) -> Value {
    json!({
        "prompt": prompt,
        "width": 64,
        "height": 64,
        "num_frames": 4,
        "fps": 8
    })
}

/// GIVEN a configured service
/// WHEN a client posts the documented txt2video example
/// THEN the response carries a URL on the configured host and bucket and no artifact remains
#[tokio::test]
async fn test_txt2video_end_to_end() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/lightricks-api/txt2video",
            json!({"prompt": "a cat walking", "width": 704, "height": 480, "num_frames": 161, "fps": 24}),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["message"], "Video generated and uploaded (txt2video)");
    let url = body["url"].as_str().unwrap();
    assert!(url.starts_with("https://minio.example.com/videos/generated-videos/output_"));
    assert_eq!(app.leftover_files(), 0);
}

#[tokio::test]
async fn test_batch_returns_one_url_per_video() {
    let app = TestApp::new();
    let mut body = small_body("a cat walking");
    body["num_videos_per_prompt"] = json!(3);

    let (status, body) = app.post("/lightricks-api/txt2video/batch", body).await;

    assert_eq!(status, StatusCode::OK);
    let urls = body["urls"].as_array().unwrap();
    assert_eq!(urls.len(), 3);
    assert_ne!(urls[0], urls[1]);
    assert_ne!(urls[1], urls[2]);
    assert_eq!(app.leftover_files(), 0);
}

#[tokio::test]
async fn test_validation_errors_listed() {
    let app = TestApp::new();

    let (status, body) = app
        .post(
            "/lightricks-api/txt2video",
            json!({"prompt": "a cat", "width": 2000, "guidance_scale": 0.5}),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation");
    let fields: Vec<&str> = body["validation_errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap())
        .collect();
    assert_eq!(fields, vec!["width", "guidance_scale"]);

    // Rejected before any pipeline was touched
    let (_, health) = app.get("/health").await;
    assert_eq!(health["models"]["text-to-video"], false);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = TestApp::new();

    let (status, body) = app
        .post_raw("/lightricks-api/txt2video", "{\"prompt\": ".to_string())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "input");

    let (status, _) = app
        .post("/lightricks-api/txt2video", json!({"width": 64}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_img2video_with_unreachable_image() {
    let app = TestApp::new();
    let mut body = small_body("the cat starts running");
    body["image_url"] = json!("/no/such/image.png");

    let (status, body) = app.post("/lightricks-api/img2video", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "input");
}

#[tokio::test]
async fn test_health_reports_loaded_models() {
    let app = TestApp::new();

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["device"], "cpu");
    assert_eq!(body["models"]["text-to-video"], false);
    assert_eq!(body["models"]["image-to-video"], false);

    let (status, _) = app
        .post("/lightricks-api/txt2video", small_body("a cat walking"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get("/health").await;
    assert_eq!(body["models"]["text-to-video"], true);
    assert_eq!(body["models"]["image-to-video"], false);
}

#[tokio::test]
async fn test_clear_models() {
    let app = TestApp::new();
    app.post("/lightricks-api/txt2video", small_body("a cat walking"))
        .await;

    let (status, body) = app.post("/lightricks-api/models/clear", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 1);
    assert_eq!(body["in_flight"], 0);

    let (_, health) = app.get("/health").await;
    assert_eq!(health["models"]["text-to-video"], false);

    // Idempotent
    let (_, body) = app.post("/lightricks-api/models/clear", Value::Null).await;
    assert_eq!(body["released"], 0);
}

#[tokio::test]
async fn test_storage_health() {
    let (status, body) = TestApp::new().get("/health/minio").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["minio_connected"], true);

    let app = TestApp::with_storage(
        Arc::new(ObjectStorage::unconfigured(["MINIO_ENDPOINT"])),
        "lightricks-api",
    );
    let (_, body) = app.get("/health/minio").await;
    assert_eq!(body["minio_connected"], false);
}

#[tokio::test]
async fn test_unconfigured_storage_fails_request_and_cleans_up() {
    let app = TestApp::with_storage(
        Arc::new(ObjectStorage::unconfigured(["MINIO_BUCKET"])),
        "lightricks-api",
    );

    let (status, body) = app
        .post("/lightricks-api/txt2video", small_body("a cat walking"))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error_type"], "configuration");
    assert!(body["message"].as_str().unwrap().contains("MINIO_BUCKET"));
    assert_eq!(app.leftover_files(), 0);
}

#[tokio::test]
async fn test_service_info_lists_prefixed_routes() {
    let (status, body) = TestApp::new().get("/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "videogen");
    let endpoints = body["endpoints"].as_array().unwrap();
    assert!(endpoints.contains(&json!("/lightricks-api/txt2video")));
    assert!(endpoints.contains(&json!("/health/minio")));
}

#[tokio::test]
async fn test_empty_prefix_mounts_at_root() {
    let app = TestApp::with_storage(
        Arc::new(ObjectStorage::with_store(
            Arc::new(InMemory::new()),
            "videos",
            "minio.example.com",
            "",
        )),
        "/",
    );

    let (status, body) = app.post("/txt2video", small_body("a cat walking")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["url"]
        .as_str()
        .unwrap()
        .starts_with("https://minio.example.com/videos/output_"));

    let (status, _) = app
        .post("/lightricks-api/txt2video", small_body("a cat walking"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
