pub mod files;
pub mod generate;
pub mod status;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(status::root))
        .route("/health", get(status::health))
        .route("/generate-toy", post(generate::generate_toy))
        .route("/generate-image-only", post(generate::generate_image_only))
        .route("/image-to-3d", post(generate::image_to_3d))
        .route("/download/{*file_path}", get(files::download))
        .route("/cleanup", delete(files::cleanup))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::tests::{png_bytes, FakePipeline};
    use crate::storage::Storage;
    use crate::toy::tests::{service_with, FakeModel};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use std::fs::File;
    use std::path::Path;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};
    use tower::ServiceExt;

    const BOUNDARY: &str = "toyforgeboundary";

    enum Part<'a> {
        File {
            name: &'a str,
            content_type: &'a str,
            bytes: Vec<u8>,
        },
        Text {
            name: &'a str,
            value: &'a str,
        },
    }

    fn multipart_body(parts: &[Part]) -> Vec<u8> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File {
                    name,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                }
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn multipart_request(uri: &str, parts: &[Part]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    fn toy_parts<'a>(person_type: &'a str, output_format: &'a str) -> Vec<Part<'a>> {
        vec![
            Part::File {
                name: "person_image",
                content_type: person_type,
                bytes: png_bytes(),
            },
            Part::File {
                name: "style_guide",
                content_type: "image/png",
                bytes: png_bytes(),
            },
            Part::Text {
                name: "prompt",
                value: "A desk figurine holding a coffee mug",
            },
            Part::Text {
                name: "output_format",
                value: output_format,
            },
        ]
    }

    struct TestApp {
        _root: tempfile::TempDir,
        storage: Storage,
        model: Arc<FakeModel>,
        router: Router,
    }

    async fn test_app(model: FakeModel, pipeline: FakePipeline) -> TestApp {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::new(root.path().join("outputs"), root.path().join("temp"));
        storage.ensure_dirs().await.unwrap();
        let model = Arc::new(model);
        let service = service_with(model.clone(), Arc::new(pipeline), storage.clone());
        let state = AppState::new(service, storage.clone(), Duration::from_secs(3600));
        TestApp {
            _root: root,
            storage,
            model,
            router: router(state, 25 * 1024 * 1024),
        }
    }

    async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn root_and_health_report_status() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;

        let (status, body) = send(&app, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json(&body)["message"], "3D Toy Generation API is running!");

        let (status, body) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        let health = json(&body);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["genai_client"], true);
        assert_eq!(health["trellis_pipeline"], true);
    }

    #[tokio::test]
    async fn generate_toy_runs_the_full_pipeline() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;

        let request = multipart_request("/generate-toy", &toy_parts("image/png", "gaussian"));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        let value = json(&body);
        assert_eq!(value["success"], true);
        assert_eq!(value["message"], "Toy generation completed successfully");
        assert_eq!(value["person_description"], "Short brown hair. Round glasses.");
        assert!(value["toy_image"]
            .as_str()
            .unwrap()
            .contains("generated_toy_"));
        assert_eq!(value["model_result"]["formats"], serde_json::json!(["gaussian"]));
        assert!(value["model_result"]["files"]["ply"].is_string());
        assert!(value["model_result"]["files"]["preview_video"].is_string());
        assert_eq!(entries(app.storage.temp_dir()), 0);
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected_before_any_model_call() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;

        let request = multipart_request("/generate-toy", &toy_parts("text/plain", "gaussian"));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json(&body)["detail"], "Person file must be an image");
        assert_eq!(app.model.describe_calls.load(Ordering::SeqCst), 0);
        assert_eq!(entries(app.storage.output_dir()), 0);
        assert_eq!(entries(app.storage.temp_dir()), 0);
    }

    #[tokio::test]
    async fn unknown_output_format_is_a_bad_request() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;

        let request = multipart_request("/generate-toy", &toy_parts("image/png", "voxels"));
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(app.model.describe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn image_only_skips_reconstruction() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;

        let request = multipart_request("/generate-image-only", &toy_parts("image/png", ""));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value["style_description"], "Chibi proportions, glossy vinyl.");
        assert!(value.get("model_result").is_none());
        assert_eq!(entries(app.storage.output_dir()), 1);
        assert_eq!(entries(app.storage.temp_dir()), 0);
    }

    #[tokio::test]
    async fn missing_generated_image_is_a_server_error() {
        let model = FakeModel {
            return_no_image: true,
            ..FakeModel::default()
        };
        let app = test_app(model, FakePipeline::default()).await;

        let request = multipart_request("/generate-image-only", &toy_parts("image/png", ""));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let value = json(&body);
        assert_eq!(
            value["detail"],
            "Error generating toy image: Model did not return an image"
        );
        assert_eq!(value["code"], "UPSTREAM_ERROR");
        assert_eq!(entries(app.storage.temp_dir()), 0);
    }

    #[tokio::test]
    async fn image_to_3d_returns_distinct_model_ids() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;

        let mut ids = Vec::new();
        for _ in 0..2 {
            let parts = [
                Part::File {
                    name: "image",
                    content_type: "image/png",
                    bytes: png_bytes(),
                },
                Part::Text {
                    name: "output_format",
                    value: "mesh",
                },
            ];
            let (status, body) = send(&app, multipart_request("/image-to-3d", &parts)).await;
            assert_eq!(status, StatusCode::OK);
            let value = json(&body);
            assert!(value["files"]["glb"].is_string());
            ids.push(value["model_id"].as_str().unwrap().to_string());
        }
        assert_ne!(ids[0], ids[1]);
        assert_eq!(app.model.describe_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn glb_failure_still_succeeds() {
        let pipeline = FakePipeline {
            fail_glb: true,
            ..FakePipeline::default()
        };
        let app = test_app(FakeModel::default(), pipeline).await;

        let request = multipart_request("/generate-toy", &toy_parts("image/png", "all"));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let files = &json(&body)["model_result"]["files"];
        assert!(files.get("glb").is_none());
        assert!(files["ply"].is_string());
    }

    #[tokio::test]
    async fn downloads_are_scoped_to_the_output_directory() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;
        std::fs::write(app.storage.output_dir().join("model_abc.ply"), b"ply data").unwrap();
        std::fs::write(app.storage.temp_dir().join("secret.txt"), b"secret").unwrap();

        let response = app
            .router
            .clone()
            .oneshot(get_request("/download/model_abc.ply"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"model_abc.ply\""
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"ply data");

        let (status, _) = send(&app, get_request("/download/..%2Ftemp%2Fsecret.txt")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, get_request("/download/missing.glb")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cleanup_reports_deleted_count() {
        let app = test_app(FakeModel::default(), FakePipeline::default()).await;
        let stale = app.storage.output_dir().join("model_old.ply");
        std::fs::write(&stale, b"old").unwrap();
        File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(7200))
            .unwrap();
        std::fs::write(app.storage.output_dir().join("model_new.ply"), b"new").unwrap();

        let request = Request::builder()
            .method("DELETE")
            .uri("/cleanup")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let value = json(&body);
        assert_eq!(value["message"], "Cleaned up 1 files");
        assert_eq!(value["deleted"], 1);
        assert!(!stale.exists());
        assert_eq!(entries(app.storage.output_dir()), 1);
    }
}
