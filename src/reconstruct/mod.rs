pub mod trellis;

use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::storage::Storage;

pub use trellis::{TrellisClient, TrellisSettings};

pub const PIPELINE_SEED: u64 = 1;
pub const SPARSE_STRUCTURE_SAMPLER: SamplerParams = SamplerParams {
    steps: 12,
    cfg_strength: 7.5,
};
pub const SLAT_SAMPLER: SamplerParams = SamplerParams {
    steps: 12,
    cfg_strength: 3.0,
};
pub const PREVIEW_FPS: u32 = 15;
pub const GLB_EXPORT: GlbOptions = GlbOptions {
    simplify: 0.95,
    texture_size: 1024,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Gaussian,
    RadianceField,
    Mesh,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Gaussian => "gaussian",
            OutputFormat::RadianceField => "radiance_field",
            OutputFormat::Mesh => "mesh",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `output_format` form value: one representation, or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSelection {
    #[default]
    Gaussian,
    RadianceField,
    Mesh,
    All,
}

impl OutputSelection {
    pub fn formats(self) -> Vec<OutputFormat> {
        match self {
            OutputSelection::Gaussian => vec![OutputFormat::Gaussian],
            OutputSelection::RadianceField => vec![OutputFormat::RadianceField],
            OutputSelection::Mesh => vec![OutputFormat::Mesh],
            OutputSelection::All => vec![
                OutputFormat::Gaussian,
                OutputFormat::RadianceField,
                OutputFormat::Mesh,
            ],
        }
    }
}

impl FromStr for OutputSelection {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "gaussian" => Ok(OutputSelection::Gaussian),
            "radiance_field" => Ok(OutputSelection::RadianceField),
            "mesh" => Ok(OutputSelection::Mesh),
            "all" => Ok(OutputSelection::All),
            other => Err(anyhow!(
                "Unsupported output_format '{other}'. Use gaussian, mesh, radiance_field, or all"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SamplerParams {
    pub steps: u32,
    pub cfg_strength: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GlbOptions {
    pub simplify: f32,
    pub texture_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunParams {
    pub seed: u64,
    pub formats: Vec<OutputFormat>,
    pub sparse_structure_sampler_params: SamplerParams,
    pub slat_sampler_params: SamplerParams,
}

impl RunParams {
    pub fn fixed(formats: Vec<OutputFormat>) -> Self {
        RunParams {
            seed: PIPELINE_SEED,
            formats,
            sparse_structure_sampler_params: SPARSE_STRUCTURE_SAMPLER,
            slat_sampler_params: SLAT_SAMPLER,
        }
    }
}

/// Handle to one finished pipeline run and the representations it produced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub outputs: Vec<OutputFormat>,
}

impl PipelineRun {
    pub fn produced(&self, format: OutputFormat) -> bool {
        self.outputs.contains(&format)
    }
}

/// A pretrained image-to-3D pipeline.
#[async_trait]
pub trait ReconstructionPipeline: Send + Sync {
    async fn run(&self, image_png: Vec<u8>, params: &RunParams) -> Result<PipelineRun>;

    /// Serialized gaussian splat of `run`, as PLY.
    async fn gaussian_ply(&self, run: &PipelineRun) -> Result<Vec<u8>>;

    /// Turntable preview of the gaussian output, as MP4.
    async fn render_preview(&self, run: &PipelineRun, fps: u32) -> Result<Vec<u8>>;

    /// Textured mesh of `run`, as GLB.
    async fn export_glb(&self, run: &PipelineRun, options: &GlbOptions) -> Result<Vec<u8>>;

    fn is_ready(&self) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelResult {
    pub success: bool,
    pub model_id: String,
    pub files: BTreeMap<String, String>,
    pub formats: Vec<OutputFormat>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

fn load_image_as_png(bytes: &[u8]) -> Result<Vec<u8>> {
    let image = image::load_from_memory(bytes).context("Input is not a decodable image")?;
    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, image::ImageFormat::Png)
        .context("Failed to encode image as PNG")?;
    Ok(encoded.into_inner())
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[derive(Clone)]
pub struct Reconstructor {
    pipeline: Arc<dyn ReconstructionPipeline>,
    storage: Storage,
    permits: Arc<Semaphore>,
}

impl Reconstructor {
    pub fn new(
        pipeline: Arc<dyn ReconstructionPipeline>,
        storage: Storage,
        max_concurrent: usize,
    ) -> Self {
        Reconstructor {
            pipeline,
            storage,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.pipeline.is_ready()
    }

    pub async fn generate(&self, image_path: &Path, selection: OutputSelection) -> Result<ModelResult> {
        let raw = fs::read(image_path)
            .await
            .with_context(|| format!("Failed to read {}", image_path.display()))?;
        let image_png = tokio::task::spawn_blocking(move || load_image_as_png(&raw))
            .await
            .context("Image decoding task failed")??;

        let requested = selection.formats();
        info!("Generating 3D model with formats: {:?}", requested);

        let _permit = self
            .permits
            .acquire()
            .await
            .context("Reconstruction limiter closed")?;

        let run = self
            .pipeline
            .run(image_png, &RunParams::fixed(requested.clone()))
            .await?;

        let model_id = Uuid::new_v4().to_string();
        let mut files = BTreeMap::new();
        let mut warnings = Vec::new();

        if requested.contains(&OutputFormat::Gaussian) && run.produced(OutputFormat::Gaussian) {
            let ply_path = self.storage.output_path("model", &model_id, "ply");
            let ply = self.pipeline.gaussian_ply(&run).await?;
            write_output(&ply_path, &ply).await?;
            files.insert("ply".to_string(), path_string(&ply_path));

            let video_path = self.storage.output_path("preview", &model_id, "mp4");
            let video = self.pipeline.render_preview(&run, PREVIEW_FPS).await?;
            write_output(&video_path, &video).await?;
            files.insert("preview_video".to_string(), path_string(&video_path));
        }

        if requested.contains(&OutputFormat::Mesh) && run.produced(OutputFormat::Mesh) {
            let glb_path = self.storage.output_path("model", &model_id, "glb");
            let exported = match self.pipeline.export_glb(&run, &GLB_EXPORT).await {
                Ok(glb) => write_output(&glb_path, &glb).await,
                Err(err) => Err(err),
            };
            match exported {
                Ok(()) => {
                    files.insert("glb".to_string(), path_string(&glb_path));
                }
                Err(err) => {
                    warn!("Could not generate GLB for model {}: {:#}", model_id, err);
                    warnings.push(format!("GLB export failed: {err:#}"));
                }
            }
        }

        let formats = requested
            .into_iter()
            .filter(|format| run.produced(*format))
            .collect();

        Ok(ModelResult {
            success: true,
            model_id,
            files,
            formats,
            warnings,
        })
    }
}
