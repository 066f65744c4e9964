use axum::extract::{Multipart, State};
use axum::Json;
use serde::Serialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::handlers::upload::{ImageTo3dForm, ToyForm, UploadedFile};
use crate::reconstruct::ModelResult;
use crate::state::AppState;
use crate::storage::ScratchFiles;
use crate::utils::timing::{complete_request_timer, start_request_timer, RequestTimer};

#[derive(Debug, Serialize)]
pub struct GenerateToyResponse {
    pub success: bool,
    pub message: String,
    pub person_description: String,
    pub style_description: String,
    pub toy_image: String,
    pub model_result: ModelResult,
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub success: bool,
    pub toy_image: String,
    pub person_description: String,
    pub style_description: String,
}

fn finish<T>(timer: &mut RequestTimer, result: &AppResult<T>) {
    match result {
        Ok(_) => complete_request_timer(timer, "success", None),
        Err(err) => complete_request_timer(timer, "error", Some(err.to_string())),
    }
}

async fn stash_upload(
    state: &AppState,
    scratch: &mut ScratchFiles,
    prefix: &str,
    upload: &UploadedFile,
) -> AppResult<std::path::PathBuf> {
    debug!(
        "Storing upload {:?} ({} bytes, {:?}) as {} scratch file",
        upload.file_name,
        upload.bytes.len(),
        upload.content_type,
        prefix
    );
    scratch
        .write(state.storage.scratch_path(prefix), &upload.bytes)
        .await
        .map_err(|err| AppError::storage("Failed to store upload", &err))
}

async fn run_generate_toy(state: &AppState, multipart: Multipart) -> AppResult<GenerateToyResponse> {
    let form = ToyForm::read(multipart).await?;

    let mut scratch = ScratchFiles::new();
    let person_path = stash_upload(state, &mut scratch, "person", &form.person_image).await?;
    let style_path = stash_upload(state, &mut scratch, "style", &form.style_guide).await?;

    let toy = state
        .service
        .create_toy_image(&form.prompt, &person_path, &style_path)
        .await?;
    let model_result = state
        .service
        .generate_3d_model(&toy.toy_image, form.output_format)
        .await?;

    Ok(GenerateToyResponse {
        success: true,
        message: "Toy generation completed successfully".to_string(),
        person_description: toy.person_description,
        style_description: toy.style_description,
        toy_image: toy.toy_image.to_string_lossy().to_string(),
        model_result,
    })
}

/// POST /generate-toy
///
/// Full pipeline: describe both uploads, synthesize the toy image, and
/// reconstruct it in 3D.
pub async fn generate_toy(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<GenerateToyResponse>> {
    let mut timer = start_request_timer("/generate-toy");
    let result = run_generate_toy(&state, multipart).await;
    finish(&mut timer, &result);
    result.map(Json)
}

async fn run_generate_image_only(
    state: &AppState,
    multipart: Multipart,
) -> AppResult<GenerateImageResponse> {
    let form = ToyForm::read(multipart).await?;

    let mut scratch = ScratchFiles::new();
    let person_path = stash_upload(state, &mut scratch, "person", &form.person_image).await?;
    let style_path = stash_upload(state, &mut scratch, "style", &form.style_guide).await?;

    let toy = state
        .service
        .create_toy_image(&form.prompt, &person_path, &style_path)
        .await?;

    Ok(GenerateImageResponse {
        success: true,
        toy_image: toy.toy_image.to_string_lossy().to_string(),
        person_description: toy.person_description,
        style_description: toy.style_description,
    })
}

/// POST /generate-image-only
pub async fn generate_image_only(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<GenerateImageResponse>> {
    let mut timer = start_request_timer("/generate-image-only");
    let result = run_generate_image_only(&state, multipart).await;
    finish(&mut timer, &result);
    result.map(Json)
}

async fn run_image_to_3d(state: &AppState, multipart: Multipart) -> AppResult<ModelResult> {
    let form = ImageTo3dForm::read(multipart).await?;

    let mut scratch = ScratchFiles::new();
    let input_path = stash_upload(state, &mut scratch, "input", &form.image).await?;

    state
        .service
        .generate_3d_model(&input_path, form.output_format)
        .await
}

/// POST /image-to-3d
///
/// Reconstruction only, for an image the caller already has.
pub async fn image_to_3d(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<ModelResult>> {
    let mut timer = start_request_timer("/image-to-3d");
    let result = run_image_to_3d(&state, multipart).await;
    finish(&mut timer, &result);
    result.map(Json)
}
