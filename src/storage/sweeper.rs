use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};

use crate::storage::Storage;

async fn sweep_directory(dir: &Path, max_age: Duration, now: SystemTime) -> Result<usize> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to list {}", dir.display()));
        }
    };

    let mut deleted = 0usize;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!("Skipping {} during cleanup: {}", path.display(), err);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = metadata.modified().unwrap_or(now);
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match fs::remove_file(&path).await {
            Ok(()) => deleted += 1,
            Err(err) => warn!("Failed to delete expired file {}: {}", path.display(), err),
        }
    }

    Ok(deleted)
}

/// Deletes regular files in the output and scratch directories whose
/// modification time is older than `max_age`. Returns how many were removed.
pub async fn sweep_expired(storage: &Storage, max_age: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut deleted = 0usize;
    for dir in [storage.output_dir(), storage.temp_dir()] {
        deleted += sweep_directory(dir, max_age, now).await?;
    }
    info!(
        "Retention sweep removed {} file(s) older than {}s",
        deleted,
        max_age.as_secs()
    );
    Ok(deleted)
}
