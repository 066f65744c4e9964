use std::collections::HashMap;

use axum::extract::Multipart;

use crate::error::{AppError, AppResult};
use crate::llm::media::is_image_content_type;
use crate::reconstruct::OutputSelection;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Every field of a multipart request, keyed by field name. Later duplicates
/// replace earlier ones.
#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, UploadedFile>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut fields = HashMap::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| AppError::BadRequest(err.body_text()))?
        {
            let Some(name) = field.name().map(|name| name.to_string()) else {
                continue;
            };
            let file_name = field.file_name().map(|value| value.to_string());
            let content_type = field.content_type().map(|value| value.to_string());
            let bytes = field
                .bytes()
                .await
                .map_err(|err| AppError::BadRequest(err.body_text()))?;
            fields.insert(
                name,
                UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                },
            );
        }
        Ok(UploadForm { fields })
    }

    /// Takes a required upload whose declared content type must be `image/*`.
    pub fn image(&mut self, name: &str, not_image_message: &str) -> AppResult<UploadedFile> {
        let file = self
            .fields
            .remove(name)
            .ok_or_else(|| AppError::BadRequest(format!("Missing required field '{name}'")))?;
        if !is_image_content_type(file.content_type.as_deref()) {
            return Err(AppError::BadRequest(not_image_message.to_string()));
        }
        Ok(file)
    }

    pub fn text(&self, name: &str) -> AppResult<Option<String>> {
        let Some(field) = self.fields.get(name) else {
            return Ok(None);
        };
        String::from_utf8(field.bytes.clone())
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("Field '{name}' must be UTF-8 text")))
    }

    pub fn required_text(&self, name: &str) -> AppResult<String> {
        match self.text(name)? {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(AppError::BadRequest(format!("Missing required field '{name}'"))),
        }
    }

    /// `output_format`, defaulting to gaussian when absent.
    pub fn output_selection(&self) -> AppResult<OutputSelection> {
        match self.text("output_format")? {
            Some(value) => value
                .parse()
                .map_err(|err: anyhow::Error| AppError::BadRequest(err.to_string())),
            None => Ok(OutputSelection::default()),
        }
    }
}

/// Inputs of the full and image-only pipelines.
#[derive(Debug)]
pub struct ToyForm {
    pub person_image: UploadedFile,
    pub style_guide: UploadedFile,
    pub prompt: String,
    pub output_format: OutputSelection,
}

impl ToyForm {
    pub async fn read(multipart: Multipart) -> AppResult<Self> {
        let mut form = UploadForm::read(multipart).await?;
        let person_image = form.image("person_image", "Person file must be an image")?;
        let style_guide = form.image("style_guide", "Style guide file must be an image")?;
        let prompt = form.required_text("prompt")?;
        let output_format = form.output_selection()?;
        Ok(ToyForm {
            person_image,
            style_guide,
            prompt,
            output_format,
        })
    }
}

/// Inputs of the reconstruction-only endpoint.
#[derive(Debug)]
pub struct ImageTo3dForm {
    pub image: UploadedFile,
    pub output_format: OutputSelection,
}

impl ImageTo3dForm {
    pub async fn read(multipart: Multipart) -> AppResult<Self> {
        let mut form = UploadForm::read(multipart).await?;
        let image = form.image("image", "Uploaded file must be an image")?;
        let output_format = form.output_selection()?;
        Ok(ImageTo3dForm {
            image,
            output_format,
        })
    }
}
