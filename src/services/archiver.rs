//! Year-partitioned archival of processed receipt files.
//!
//! A file at `uploads/r1.pdf` purchased in 2024 ends up at `uploads/2024/r1.pdf`.
//! Archiving an already archived file moves it between partitions instead of
//! nesting them.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use tracing::{debug, info, warn};

/// Errors raised while archiving a receipt file.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The path does not end in a file name
    #[error("{0} does not name a file")]
    NotAFile(String),

    /// The year directory could not be created
    #[error("Failed to create {dir}: {source}")]
    CreateDir {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    /// The file could not be moved into its year directory
    #[error("Failed to move {from} to {to}: {source}")]
    Rename {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
}

/// True for directory names like `2024`.
fn is_year_partition(dir: &Path) -> bool {
    dir.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit()))
}

/// Directory that holds the year partitions for a file at `current`.
fn partition_root(current: &Path) -> &Path {
    let parent = current.parent().unwrap_or_else(|| Path::new(""));
    if is_year_partition(parent) {
        parent.parent().unwrap_or_else(|| Path::new(""))
    } else {
        parent
    }
}

/// Compute where `current` lives once archived under `purchased_at`'s year.
pub fn archive_target(current: &Path, purchased_at: NaiveDate) -> Result<PathBuf, ArchiveError> {
    let file_name = current
        .file_name()
        .ok_or_else(|| ArchiveError::NotAFile(current.display().to_string()))?;

    Ok(partition_root(current)
        .join(format!("{:04}", purchased_at.year()))
        .join(file_name))
}

/// Move `current` into its year partition and return the new path.
///
/// A missing source is treated as already moved by an earlier attempt.
pub async fn archive(current: &Path, purchased_at: NaiveDate) -> Result<PathBuf, ArchiveError> {
    let target = archive_target(current, purchased_at)?;

    if let Some(dir) = target.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| ArchiveError::CreateDir {
                dir: dir.display().to_string(),
                source,
            })?;
    }

    if current == target {
        return Ok(target);
    }

    if !matches!(tokio::fs::try_exists(current).await, Ok(true)) {
        debug!(
            "Source {} already gone, assuming it was archived to {}",
            current.display(),
            target.display()
        );
        return Ok(target);
    }

    tokio::fs::rename(current, &target)
        .await
        .map_err(|source| ArchiveError::Rename {
            from: current.display().to_string(),
            to: target.display().to_string(),
            source,
        })?;

    info!("Archived {} to {}", current.display(), target.display());
    Ok(target)
}

/// Locate the bytes for a record whose stored path may be stale.
///
/// A crash between archival and the store update leaves the file in a year
/// partition while the record still points at the upload location. Returns
/// `None` when the file exists nowhere.
pub async fn resolve_source(path: &Path) -> Option<PathBuf> {
    if matches!(tokio::fs::try_exists(path).await, Ok(true)) {
        return Some(path.to_path_buf());
    }

    let file_name = path.file_name()?;
    let root = partition_root(path);
    let scan_dir = if root.as_os_str().is_empty() {
        Path::new(".")
    } else {
        root
    };

    let mut entries = match tokio::fs::read_dir(scan_dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan {} for archived files: {}", scan_dir.display(), e);
            return None;
        }
    };

    let mut found: Option<PathBuf> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let dir = entry.path();
        if !is_year_partition(&dir) {
            continue;
        }
        let candidate = root.join(entry.file_name()).join(file_name);
        if matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
            // Most recent partition wins if the file was archived twice.
            if found.as_ref().is_none_or(|f| *f < candidate) {
                found = Some(candidate);
            }
        }
    }

    if let Some(found) = &found {
        debug!("Resolved stale path {} to {}", path.display(), found.display());
    }
    found
}
