use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::warn;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_vision_model: String,
    pub gemini_image_model: String,
    pub gemini_timeout_seconds: u64,
    pub trellis_base_url: String,
    pub trellis_model: String,
    pub trellis_device: String,
    pub trellis_timeout_seconds: u64,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub retention_seconds: u64,
    pub max_concurrent_reconstructions: usize,
    pub max_upload_bytes: usize,
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u16>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn resolve_gemini_api_key() -> String {
    let primary = env_string("GEMINI_API_KEY", "");
    if !primary.is_empty() {
        return primary;
    }
    env_string("GOOGLE_API_KEY", "")
}

fn normalize_base_url(name: &str, value: String) -> Result<String> {
    let parsed = Url::parse(&value).with_context(|| format!("{name} is not a valid URL: {value}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(anyhow!("{name} must use http or https, got {}", parsed.scheme()));
    }
    Ok(value.trim_end_matches('/').to_string())
}

impl Config {
    pub fn load() -> Result<Self> {
        let gemini_api_key = resolve_gemini_api_key();
        if gemini_api_key.is_empty() {
            return Err(anyhow!("GEMINI_API_KEY (or GOOGLE_API_KEY) is required"));
        }

        let mut max_concurrent_reconstructions = env_usize("MAX_CONCURRENT_RECONSTRUCTIONS", 1);
        if max_concurrent_reconstructions == 0 {
            warn!("MAX_CONCURRENT_RECONSTRUCTIONS must be at least 1; using 1.");
            max_concurrent_reconstructions = 1;
        }

        Ok(Config {
            host: env_string("HOST", "0.0.0.0"),
            port: env_u16("PORT", 8000),
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            gemini_api_key,
            gemini_base_url: normalize_base_url(
                "GEMINI_BASE_URL",
                env_string("GEMINI_BASE_URL", "https://generativelanguage.googleapis.com"),
            )?,
            gemini_vision_model: env_string("GEMINI_VISION_MODEL", "gemini-2.5-flash"),
            gemini_image_model: env_string(
                "GEMINI_IMAGE_MODEL",
                "gemini-2.0-flash-preview-image-generation",
            ),
            gemini_timeout_seconds: env_u64("GEMINI_TIMEOUT_SECONDS", 120),
            trellis_base_url: normalize_base_url(
                "TRELLIS_BASE_URL",
                env_string("TRELLIS_BASE_URL", "http://127.0.0.1:8001"),
            )?,
            trellis_model: env_string("TRELLIS_MODEL", "JeffreyXiang/TRELLIS-image-large"),
            trellis_device: env_string("TRELLIS_DEVICE", "cuda"),
            trellis_timeout_seconds: env_u64("TRELLIS_TIMEOUT_SECONDS", 900),
            output_dir: PathBuf::from(env_string("OUTPUT_DIR", "outputs")),
            temp_dir: PathBuf::from(env_string("TEMP_DIR", "temp")),
            retention_seconds: env_u64("RETENTION_SECONDS", 3600),
            max_concurrent_reconstructions,
            max_upload_bytes: env_usize("MAX_UPLOAD_BYTES", 25 * 1024 * 1024),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_seconds)
    }

    pub fn gemini_timeout(&self) -> Duration {
        Duration::from_secs(self.gemini_timeout_seconds.max(1))
    }

    pub fn trellis_timeout(&self) -> Duration {
        Duration::from_secs(self.trellis_timeout_seconds.max(1))
    }
}

pub const PERSON_DESCRIPTION_PROMPT: &str = "Describe the person in this image in detail. List their hair style and color, facial hair, any glasses, and the clothing they are wearing. Be factual and concise.";

pub const STYLE_DESCRIPTION_PROMPT: &str = "Describe the general artistic style of this toy figure. Focus on its proportions (head vs body size), eye style, material (e.g., glossy vinyl, matte plastic), and overall aesthetic (e.g., chibi, cute, realistic). Do not describe the character itself, only the art style.";
