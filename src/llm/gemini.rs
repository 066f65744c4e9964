use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::llm::media::inline_image_mime_type;
use crate::llm::{ImageGenerationError, MultimodalModel};
use crate::utils::http::{get_http_client, summarize_error_body, truncate_for_log};
use crate::utils::timing::log_model_timing;

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    pub vision_model: String,
    pub image_model: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    #[allow(dead_code)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    settings: GeminiSettings,
}

fn image_part(image: &[u8]) -> Value {
    json!({
        "inlineData": {
            "mimeType": inline_image_mime_type(image),
            "data": general_purpose::STANDARD.encode(image)
        }
    })
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value) -> Value {
    let mut summary = Map::new();

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let summarized_contents: Vec<Value> = contents
            .iter()
            .map(|content| {
                let role = content
                    .get("role")
                    .and_then(|value| value.as_str())
                    .unwrap_or("user");
                let parts = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| summarize_gemini_parts(parts))
                    .unwrap_or_default();
                json!({ "role": role, "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    for part in response_parts(response) {
        match part {
            GeminiPart::Text { text } => {
                text_parts += 1;
                if text_preview.is_none() && !text.trim().is_empty() {
                    text_preview = Some(truncate_for_log(text, 200));
                }
            }
            GeminiPart::InlineData { inline_data } => {
                if inline_data.mime_type.starts_with("image/") {
                    image_parts += 1;
                }
            }
            GeminiPart::Other(_) => {}
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

/// Parts of the first candidate, which is what the SDK's `response.text` and
/// `candidates[0].content.parts` read.
fn response_parts(response: &GeminiResponse) -> &[GeminiPart] {
    response
        .candidates
        .as_deref()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| content.parts.as_deref())
        .unwrap_or(&[])
}

fn extract_text_from_response(response: &GeminiResponse) -> String {
    response_parts(response)
        .iter()
        .filter_map(|part| match part {
            GeminiPart::Text { text } if !text.trim().is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn extract_first_image(response: &GeminiResponse) -> Result<Option<Vec<u8>>> {
    for part in response_parts(response) {
        if let GeminiPart::InlineData { inline_data } = part {
            if inline_data.mime_type.starts_with("image/") {
                let bytes = general_purpose::STANDARD
                    .decode(inline_data.data.as_bytes())
                    .map_err(|err| anyhow!("Failed to decode inline image data: {err}"))?;
                return Ok(Some(bytes));
            }
        }
    }
    Ok(None)
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Self {
        GeminiClient {
            http: get_http_client().clone(),
            settings,
        }
    }

    fn redact_api_key(&self, text: &str) -> String {
        let key = self.settings.api_key.trim();
        if key.is_empty() {
            return text.to_string();
        }
        text.replace(key, "[redacted]")
    }

    async fn call_gemini_api(&self, model: &str, payload: Value) -> Result<GeminiResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base_url, model
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.settings.api_key)
            .timeout(self.settings.request_timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|err| {
                let err_text = self.redact_api_key(&err.to_string());
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, model={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    model
                );
                anyhow!("Gemini request failed: {}", err_text)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            warn!(
                "Gemini API error: status={}, model={}, body={}",
                status,
                model,
                self.redact_api_key(&body_summary)
            );
            let detail = self.redact_api_key(&message.unwrap_or(body_summary));
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        let value = response
            .json::<GeminiResponse>()
            .await
            .map_err(|err| anyhow!("Failed to parse Gemini response: {err}"))?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "llm.gemini", model = model, response = %response_summary);
        }
        Ok(value)
    }
}

#[async_trait]
impl MultimodalModel for GeminiClient {
    async fn describe_image(&self, image: &[u8], instruction: &str) -> Result<String> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": instruction }, image_part(image)]
            }]
        });

        let model = self.settings.vision_model.as_str();
        log_model_timing("gemini", model, "describe_image", None, || async {
            let response = self.call_gemini_api(model, payload).await?;
            let text = extract_text_from_response(&response);
            if text.trim().is_empty() {
                return Err(anyhow!("Gemini returned no text (model: {})", model));
            }
            Ok(text)
        })
        .await
    }

    async fn generate_image(
        &self,
        prompt: &str,
        reference: &[u8],
    ) -> Result<Vec<u8>, ImageGenerationError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }, image_part(reference)]
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"]
            }
        });

        let model = self.settings.image_model.as_str();
        let image = log_model_timing("gemini", model, "generate_image", None, || async {
            let response = self.call_gemini_api(model, payload).await?;
            extract_first_image(&response)
        })
        .await
        .map_err(|err| ImageGenerationError::Request(err.to_string()))?;

        image.ok_or(ImageGenerationError::NoImage)
    }

    fn is_ready(&self) -> bool {
        !self.settings.api_key.trim().is_empty()
    }
}
