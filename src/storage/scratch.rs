use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::debug;

/// Request-scoped upload files. Every registered path is removed when the
/// guard drops, whether the request succeeded, failed, or was cancelled.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
}

impl ScratchFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` for removal, then writes `bytes` to it.
    pub async fn write(&mut self, path: PathBuf, bytes: &[u8]) -> Result<PathBuf> {
        self.paths.push(path.clone());
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write upload to {}", path.display()))?;
        Ok(path)
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed scratch file {}", path.display()),
        Err(err) => debug!("Scratch file {} not removed: {}", path.display(), err),
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            remove_quietly(&path);
        }
    }
}
