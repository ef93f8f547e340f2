//! Contract between the download flow and the video engine
//!
//! The engine is a black box: it extracts metadata, downloads with a
//! configured format selector, and reports progress by calling a synchronous
//! hook from its own worker thread.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::validation::Platform;
use crate::download::ytdlp_errors::FailureKind;

/// Metadata for one downloadable format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: String,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub fps: Option<f64>,
    /// Exact size when known, otherwise the engine's estimate
    pub filesize: Option<u64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub abr: Option<f64>,
    pub vbr: Option<f64>,
    pub note: Option<String>,
}

impl FormatInfo {
    pub fn is_audio_only(&self) -> bool {
        self.vcodec.as_deref() == Some("none")
    }
}

/// Extracted video metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub url: String,
    pub title: String,
    pub duration: Option<u64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
    pub upload_date: Option<String>,
    pub platform: Option<Platform>,
    pub formats: Vec<FormatInfo>,
    pub is_live: bool,
    pub is_private: bool,
    pub age_restricted: bool,
    pub extractor: Option<String>,
    pub webpage_url: Option<String>,
}

impl VideoInfo {
    /// Distinct video heights, highest first.
    pub fn available_heights(&self) -> Vec<u32> {
        let mut heights: Vec<u32> = self
            .formats
            .iter()
            .filter(|f| !f.is_audio_only())
            .filter_map(|f| f.height)
            .filter(|h| *h > 0)
            .collect();
        heights.sort_unstable_by(|a, b| b.cmp(a));
        heights.dedup();
        heights
    }
}

/// Every option the engine recognizes.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOptions {
    /// Format selection expression, e.g. `bestvideo[height<=720]+bestaudio/best`
    pub format_selector: String,
    /// Output path template; the engine fills in the extension
    pub output_template: String,
    /// Netscape cookie file passed to the engine
    pub cookie_file: Option<PathBuf>,
    pub retries: u32,
    pub socket_timeout: Duration,
    /// Hard deadline for the whole call; the engine process is killed after it
    pub timeout: Duration,
    pub concurrent_fragments: u32,
    /// Container for merged video+audio
    pub merge_output_format: String,
    /// Convert the result to mp3
    pub extract_audio: bool,
    /// Largest acceptable file; larger downloads fail with `FileTooLarge`
    pub max_filesize: Option<u64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            format_selector: "bestvideo+bestaudio/best".to_string(),
            output_template: "%(id)s.%(ext)s".to_string(),
            cookie_file: None,
            retries: config::download::RETRIES,
            socket_timeout: config::download::socket_timeout(),
            timeout: config::download::download_timeout(),
            concurrent_fragments: config::download::CONCURRENT_FRAGMENTS,
            merge_output_format: config::download::MERGE_OUTPUT_FORMAT.to_string(),
            extract_audio: false,
            max_filesize: None,
        }
    }
}

/// A progress event exactly as the engine emits it.
///
/// Mirrors the engine's progress dictionary; unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawProgressEvent {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub downloaded_bytes: Option<u64>,
    #[serde(default)]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub total_bytes_estimate: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub eta: Option<f64>,
}

impl RawProgressEvent {
    pub fn downloading(downloaded: u64, total: Option<u64>, speed: Option<f64>, eta: Option<f64>) -> Self {
        Self {
            status: "downloading".to_string(),
            downloaded_bytes: Some(downloaded),
            total_bytes: total,
            total_bytes_estimate: None,
            speed,
            eta,
        }
    }

    pub fn finished() -> Self {
        Self {
            status: "finished".to_string(),
            ..Self::default()
        }
    }

    pub fn error() -> Self {
        Self {
            status: "error".to_string(),
            ..Self::default()
        }
    }

    /// Exact total when known, otherwise the estimate.
    pub fn total(&self) -> u64 {
        self.total_bytes
            .filter(|t| *t > 0)
            .or_else(|| self.total_bytes_estimate.map(|e| e.max(0.0) as u64))
            .unwrap_or(0)
    }
}

/// Synchronous progress callback invoked from the engine's worker thread.
pub trait ProgressHook: Send + Sync {
    fn on_event(&self, event: RawProgressEvent);
}

/// A hook that drops every event.
pub struct NoopHook;

impl ProgressHook for NoopHook {
    fn on_event(&self, _event: RawProgressEvent) {}
}

pub type SharedHook = Arc<dyn ProgressHook>;

/// Result of a download call, never a raw error.
#[derive(Debug, Clone, PartialEq)]
pub enum DownloadOutcome {
    Success { path: PathBuf },
    Failure { kind: FailureKind, message: String },
}

impl DownloadOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
        }
    }
}

/// The external video engine.
#[async_trait]
pub trait VideoEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &str;

    /// Extracts metadata; `Ok(None)` when the URL has no extractable video.
    async fn extract_info(&self, url: &str, options: &EngineOptions) -> AppResult<Option<VideoInfo>>;

    /// Downloads `url`, reporting progress through `hook`.
    async fn download(&self, url: &str, options: &EngineOptions, hook: SharedHook) -> DownloadOutcome;
}
