pub mod gemini;
pub mod media;

use async_trait::async_trait;

pub use gemini::{GeminiClient, GeminiSettings};

#[derive(Debug, thiserror::Error)]
pub enum ImageGenerationError {
    #[error("Model did not return an image")]
    NoImage,
    #[error("{0}")]
    Request(String),
}

/// A hosted model that accepts text plus an image and answers with text or an
/// image.
#[async_trait]
pub trait MultimodalModel: Send + Sync {
    /// Returns the model's answer to `instruction` about `image`, as raw text.
    async fn describe_image(&self, image: &[u8], instruction: &str) -> anyhow::Result<String>;

    /// Returns the first inline image the model produces for `prompt`, using
    /// `reference` as the visual input.
    async fn generate_image(
        &self,
        prompt: &str,
        reference: &[u8],
    ) -> Result<Vec<u8>, ImageGenerationError>;

    fn is_ready(&self) -> bool;
}
