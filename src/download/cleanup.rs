//! Sweeping of leftover temporary files in the download folder.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::task::JoinHandle;

/// Files removed by one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub files: usize,
    pub bytes: u64,
}

/// Removes regular files in `dir` last modified more than `max_age` ago.
///
/// Subdirectories are left alone. A missing directory is an empty sweep.
pub fn cleanup_temp_files(dir: &Path, max_age: Duration) -> std::io::Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if !dir.is_dir() {
        return Ok(report);
    }

    let now = SystemTime::now();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            _ => continue,
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|m| now.duration_since(m).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                report.files += 1;
                report.bytes += metadata.len();
                log::debug!("Removed stale temp file {}", path.display());
            }
            Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
        }
    }

    Ok(report)
}

/// Deletes `path`, logging anything but "not found".
pub async fn remove_file_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Runs [`cleanup_temp_files`] on `dir` every `interval`.
pub fn spawn_cleanup_task(dir: PathBuf, interval: Duration, max_age: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let sweep_dir = dir.clone();
            match tokio::task::spawn_blocking(move || cleanup_temp_files(&sweep_dir, max_age)).await {
                Ok(Ok(report)) if report.files > 0 => log::info!(
                    "Temp cleanup removed {} file(s), {} bytes",
                    report.files,
                    report.bytes
                ),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => log::warn!("Temp cleanup of {} failed: {}", dir.display(), e),
                Err(e) => log::error!("Temp cleanup task panicked: {}", e),
            }
        }
    })
}
