pub mod prompt;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{PERSON_DESCRIPTION_PROMPT, STYLE_DESCRIPTION_PROMPT};
use crate::error::{AppError, AppResult};
use crate::llm::MultimodalModel;
use crate::reconstruct::{ModelResult, OutputSelection, Reconstructor};
use crate::storage::Storage;

use prompt::{compose_toy_prompt, single_line};

#[derive(Debug, Clone)]
pub struct ToyImage {
    pub person_description: String,
    pub style_description: String,
    pub toy_image: PathBuf,
}

/// Runs the describe, compose, synthesize and reconstruct steps against the
/// collaborators it was built with.
#[derive(Clone)]
pub struct ToyService {
    model: Arc<dyn MultimodalModel>,
    reconstructor: Reconstructor,
    storage: Storage,
}

async fn read_upload(path: &Path) -> AppResult<Vec<u8>> {
    fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
        .map_err(|err| AppError::storage("Failed to read upload", &err))
}

fn save_as_png(bytes: &[u8], path: &Path) -> anyhow::Result<()> {
    let image = image::load_from_memory(bytes).context("Generated payload is not a decodable image")?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("Failed to save {}", path.display()))
}

impl ToyService {
    pub fn new(model: Arc<dyn MultimodalModel>, reconstructor: Reconstructor, storage: Storage) -> Self {
        ToyService {
            model,
            reconstructor,
            storage,
        }
    }

    pub fn model_ready(&self) -> bool {
        self.model.is_ready()
    }

    pub fn pipeline_ready(&self) -> bool {
        self.reconstructor.is_ready()
    }

    async fn describe(
        &self,
        image_path: &Path,
        instruction: &str,
        context: &'static str,
    ) -> AppResult<String> {
        let image = read_upload(image_path).await?;
        let text = self
            .model
            .describe_image(&image, instruction)
            .await
            .map_err(|err| AppError::upstream(context, format!("{err:#}")))?;
        Ok(single_line(&text))
    }

    pub async fn analyze_person_image(&self, image_path: &Path) -> AppResult<String> {
        info!("Analyzing person image...");
        self.describe(image_path, PERSON_DESCRIPTION_PROMPT, "Error analyzing person image")
            .await
    }

    pub async fn analyze_toy_style(&self, image_path: &Path) -> AppResult<String> {
        info!("Analyzing toy style...");
        self.describe(image_path, STYLE_DESCRIPTION_PROMPT, "Error analyzing toy style")
            .await
    }

    pub async fn generate_toy_image(
        &self,
        user_prompt: &str,
        person_description: &str,
        style_description: &str,
        person_image_path: &Path,
    ) -> AppResult<PathBuf> {
        const CONTEXT: &str = "Error generating toy image";

        info!("Generating toy image...");
        let person_image = read_upload(person_image_path).await?;
        let final_prompt = compose_toy_prompt(user_prompt, person_description, style_description);
        debug!("Enriched prompt: {}", final_prompt);

        let generated = self
            .model
            .generate_image(&final_prompt, &person_image)
            .await
            .map_err(|err| AppError::upstream(CONTEXT, err))?;

        let output_path =
            self.storage
                .output_path("generated_toy", &Uuid::new_v4().to_string(), "png");
        let target = output_path.clone();
        tokio::task::spawn_blocking(move || save_as_png(&generated, &target))
            .await
            .map_err(|err| AppError::upstream(CONTEXT, err))?
            .map_err(|err| AppError::upstream(CONTEXT, format!("{err:#}")))?;

        info!("Saved generated toy image to {}", output_path.display());
        Ok(output_path)
    }

    pub async fn generate_3d_model(
        &self,
        image_path: &Path,
        selection: OutputSelection,
    ) -> AppResult<ModelResult> {
        info!("Generating 3D model...");
        self.reconstructor
            .generate(image_path, selection)
            .await
            .map_err(|err| AppError::upstream("Error generating 3D model", format!("{err:#}")))
    }

    /// Describe both images, compose the prompt, and synthesize the toy image.
    pub async fn create_toy_image(
        &self,
        user_prompt: &str,
        person_image_path: &Path,
        style_image_path: &Path,
    ) -> AppResult<ToyImage> {
        let person_description = self.analyze_person_image(person_image_path).await?;
        let style_description = self.analyze_toy_style(style_image_path).await?;
        let toy_image = self
            .generate_toy_image(
                user_prompt,
                &person_description,
                &style_description,
                person_image_path,
            )
            .await?;

        Ok(ToyImage {
            person_description,
            style_description,
            toy_image,
        })
    }
}
