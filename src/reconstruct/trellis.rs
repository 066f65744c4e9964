use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder};
use serde_json::json;
use tracing::{info, warn};

use crate::reconstruct::{GlbOptions, PipelineRun, ReconstructionPipeline, RunParams};
use crate::utils::http::{get_http_client, summarize_error_body};
use crate::utils::timing::log_model_timing;

#[derive(Debug, Clone)]
pub struct TrellisSettings {
    pub base_url: String,
    pub model: String,
    pub device: String,
    pub request_timeout: Duration,
}

/// Client for the sidecar process that hosts the TRELLIS image-to-3D pipeline
/// on the GPU.
#[derive(Debug)]
pub struct TrellisClient {
    http: Client,
    settings: TrellisSettings,
    loaded: AtomicBool,
}

impl TrellisClient {
    pub fn new(settings: TrellisSettings) -> Self {
        TrellisClient {
            http: get_http_client().clone(),
            settings,
            loaded: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .timeout(self.settings.request_timeout)
            .send()
            .await
            .map_err(|err| {
                warn!(
                    "Trellis {} request failed to send: {} (timeout={}, connect={})",
                    operation,
                    err,
                    err.is_timeout(),
                    err.is_connect()
                );
                anyhow!("Trellis {} request failed: {}", operation, err)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!(
                "Trellis {} error: status={}, body={}",
                operation, status, body_summary
            );
            return Err(anyhow!(
                "Trellis {} failed with status {}: {}",
                operation,
                status,
                message.unwrap_or(body_summary)
            ));
        }

        Ok(response)
    }

    async fn fetch_bytes(&self, operation: &str, request: RequestBuilder) -> Result<Vec<u8>> {
        let model = self.settings.model.as_str();
        log_model_timing("trellis", model, operation, None, || async {
            let response = self.send(operation, request).await?;
            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read Trellis {operation} response"))?;
            if bytes.is_empty() {
                return Err(anyhow!("Trellis {operation} returned an empty body"));
            }
            Ok(bytes.to_vec())
        })
        .await
    }

    /// Asks the sidecar to load the pretrained weights onto the configured
    /// device. Called once at startup.
    pub async fn load(&self) -> Result<()> {
        info!(
            "Loading Trellis 3D pipeline {} on {}",
            self.settings.model, self.settings.device
        );
        let request = self.http.post(self.url("/pipeline/load")).json(&json!({
            "model": self.settings.model,
            "device": self.settings.device,
        }));
        let model = self.settings.model.as_str();
        log_model_timing("trellis", model, "load", None, || async {
            self.send("load", request).await.map(|_| ())
        })
        .await?;
        self.loaded.store(true, Ordering::SeqCst);
        info!("Trellis pipeline ready");
        Ok(())
    }
}

#[async_trait]
impl ReconstructionPipeline for TrellisClient {
    async fn run(&self, image_png: Vec<u8>, params: &RunParams) -> Result<PipelineRun> {
        let params_json = serde_json::to_string(params)?;
        let image = Part::bytes(image_png)
            .file_name("input.png")
            .mime_str("image/png")?;
        let params_part = Part::text(params_json).mime_str("application/json")?;
        let form = Form::new().part("image", image).part("params", params_part);

        let request = self.http.post(self.url("/runs")).multipart(form);
        let model = self.settings.model.as_str();
        let metadata = json!({ "formats": params.formats, "seed": params.seed });
        log_model_timing("trellis", model, "run", Some(metadata), || async {
            let response = self.send("run", request).await?;
            response
                .json::<PipelineRun>()
                .await
                .map_err(|err| anyhow!("Failed to parse Trellis run response: {err}"))
        })
        .await
    }

    async fn gaussian_ply(&self, run: &PipelineRun) -> Result<Vec<u8>> {
        let request = self
            .http
            .get(self.url(&format!("/runs/{}/gaussian.ply", run.run_id)));
        self.fetch_bytes("gaussian_ply", request).await
    }

    async fn render_preview(&self, run: &PipelineRun, fps: u32) -> Result<Vec<u8>> {
        let request = self
            .http
            .post(self.url(&format!("/runs/{}/preview", run.run_id)))
            .json(&json!({ "fps": fps }));
        self.fetch_bytes("render_preview", request).await
    }

    async fn export_glb(&self, run: &PipelineRun, options: &GlbOptions) -> Result<Vec<u8>> {
        let request = self
            .http
            .post(self.url(&format!("/runs/{}/glb", run.run_id)))
            .json(options);
        self.fetch_bytes("export_glb", request).await
    }

    fn is_ready(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::{OutputFormat, GLB_EXPORT};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(base_url: &str) -> TrellisClient {
        TrellisClient::new(TrellisSettings {
            base_url: base_url.to_string(),
            model: "JeffreyXiang/TRELLIS-image-large".to_string(),
            device: "cuda".to_string(),
            request_timeout: Duration::from_secs(5),
        })
    }

    fn run_handle() -> PipelineRun {
        PipelineRun {
            run_id: "abc".to_string(),
            outputs: vec![OutputFormat::Gaussian, OutputFormat::Mesh],
        }
    }

    #[tokio::test]
    async fn load_marks_pipeline_ready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline/load"))
            .and(body_json(json!({
                "model": "JeffreyXiang/TRELLIS-image-large",
                "device": "cuda"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "loaded": true })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server.uri());
        assert!(!client.is_ready());
        client.load().await.unwrap();
        assert!(client.is_ready());
    }

    #[tokio::test]
    async fn failed_load_leaves_pipeline_unready() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/pipeline/load"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "detail": "no CUDA device" })),
            )
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let err = client.load().await.unwrap_err();
        assert!(err.to_string().contains("no CUDA device"));
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn run_posts_image_and_parses_outputs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run_id": "abc",
                "outputs": ["gaussian", "mesh"]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let run = client
            .run(
                b"png".to_vec(),
                &RunParams::fixed(vec![OutputFormat::Gaussian, OutputFormat::Mesh]),
            )
            .await
            .unwrap();
        assert_eq!(run, run_handle());

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests[0].body);
        assert!(body.contains("name=\"image\""));
        assert!(body.contains("name=\"params\""));
        assert!(body.contains("\"slat_sampler_params\""));
    }

    #[tokio::test]
    async fn artifacts_are_fetched_per_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/runs/abc/gaussian.ply"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ply-bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/runs/abc/preview"))
            .and(body_json(json!({ "fps": 15 })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"mp4-bytes".to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/runs/abc/glb"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(json!({ "detail": "texture bake failed" })),
            )
            .mount(&server)
            .await;

        let client = client(&server.uri());
        let run = run_handle();
        assert_eq!(client.gaussian_ply(&run).await.unwrap(), b"ply-bytes");
        assert_eq!(client.render_preview(&run, 15).await.unwrap(), b"mp4-bytes");
        let err = client.export_glb(&run, &GLB_EXPORT).await.unwrap_err();
        assert!(err.to_string().contains("texture bake failed"));
    }
}
