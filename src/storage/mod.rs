pub mod scratch;
pub mod sweeper;

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use uuid::Uuid;

pub use scratch::ScratchFiles;

#[derive(Debug, thiserror::Error)]
pub enum DownloadPathError {
    #[error("File path is required")]
    Empty,
    #[error("Path '{0}' is outside the output directory")]
    OutsideOutputDir(String),
    #[error("File not found")]
    NotFound,
}

/// The two directories the service writes to: persisted assets in
/// `output_dir`, request-scoped uploads in `temp_dir`.
#[derive(Debug, Clone)]
pub struct Storage {
    output_dir: PathBuf,
    temp_dir: PathBuf,
}

impl Storage {
    pub fn new(output_dir: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Storage {
            output_dir: output_dir.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.output_dir, &self.temp_dir] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create directory {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn scratch_path(&self, prefix: &str) -> PathBuf {
        self.temp_dir.join(format!("{prefix}_{}.png", Uuid::new_v4()))
    }

    pub fn output_path(&self, stem: &str, id: &str, extension: &str) -> PathBuf {
        self.output_dir.join(format!("{stem}_{id}.{extension}"))
    }

    /// Maps a client-supplied download path onto an existing file inside the
    /// output directory. Accepts bare file names as well as paths that repeat
    /// the output directory prefix the API hands out.
    pub fn resolve_download(&self, raw_path: &str) -> Result<PathBuf, DownloadPathError> {
        let trimmed = raw_path.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return Err(DownloadPathError::Empty);
        }

        let requested = Path::new(trimmed);
        if requested
            .components()
            .any(|component| matches!(component, Component::ParentDir))
        {
            return Err(DownloadPathError::OutsideOutputDir(raw_path.to_string()));
        }

        let relative_output = self
            .output_dir
            .strip_prefix("/")
            .unwrap_or(&self.output_dir);
        let candidate = match requested.strip_prefix(relative_output) {
            Ok(rest) if !rest.as_os_str().is_empty() => self.output_dir.join(rest),
            _ => self.output_dir.join(requested),
        };

        let resolved = candidate
            .canonicalize()
            .map_err(|_| DownloadPathError::NotFound)?;
        let root = self
            .output_dir
            .canonicalize()
            .map_err(|_| DownloadPathError::NotFound)?;
        if !resolved.starts_with(&root) {
            return Err(DownloadPathError::OutsideOutputDir(raw_path.to_string()));
        }
        if !resolved.is_file() {
            return Err(DownloadPathError::NotFound);
        }
        Ok(resolved)
    }
}
