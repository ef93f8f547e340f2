//! Plain HTTP downloads for direct links to video files.
//!
//! Implements [`VideoEngine`] so the pipeline can treat a direct link like
//! any other source. Metadata comes from a HEAD request; the body is streamed
//! to disk with progress reported through the same hook contract as yt-dlp.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio::io::AsyncWriteExt;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::validation::Platform;
use crate::download::engine::{
    DownloadOutcome, EngineOptions, FormatInfo, RawProgressEvent, SharedHook, VideoEngine, VideoInfo,
};
use crate::download::ytdlp_errors::FailureKind;

/// Bytes between two progress events.
const PROGRESS_STEP: u64 = 256 * 1024;

/// Direct-link engine over `reqwest`.
#[derive(Clone)]
pub struct DirectDownloader {
    client: reqwest::Client,
}

impl DirectDownloader {
    pub fn new() -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config::download::socket_timeout())
            .user_agent(concat!("vidgrab/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// File name of the URL path, without query.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let name = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = name.replace("%20", " ");
    (!decoded.is_empty()).then_some(decoded)
}

/// Extension of the linked file, defaulting to `mp4`.
pub fn extension_from_url(url: &str) -> String {
    file_name_from_url(url)
        .and_then(|name| Path::new(&name).extension().and_then(|e| e.to_str()).map(str::to_lowercase))
        .filter(|ext| ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "mp4".to_string())
}

/// Fills the `%(ext)s` field of an output template.
pub fn resolve_output_path(template: &str, ext: &str) -> PathBuf {
    PathBuf::from(template.replace("%(ext)s", ext))
}

fn classify_reqwest(err: &reqwest::Error) -> FailureKind {
    if err.is_timeout() {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    }
}

impl DirectDownloader {
    async fn stream_to_file(
        &self,
        url: &str,
        dest: &Path,
        max_filesize: Option<u64>,
        hook: &SharedHook,
    ) -> Result<u64, (FailureKind, String)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| (classify_reqwest(&e), e.to_string()))?;

        let total = response.content_length();
        if let (Some(total), Some(max)) = (total, max_filesize) {
            if total > max {
                return Err((
                    FailureKind::FileTooLarge,
                    format!("file is larger than max-filesize ({} > {})", total, max),
                ));
            }
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| (FailureKind::Unknown, format!("cannot create {}: {}", dest.display(), e)))?;

        let started = Instant::now();
        let mut downloaded: u64 = 0;
        let mut last_report: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| (classify_reqwest(&e), e.to_string()))?;
            downloaded += chunk.len() as u64;
            if max_filesize.is_some_and(|max| downloaded > max) {
                return Err((
                    FailureKind::FileTooLarge,
                    format!("file is larger than max-filesize ({} bytes so far)", downloaded),
                ));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| (FailureKind::Unknown, format!("write failed: {}", e)))?;

            if downloaded - last_report >= PROGRESS_STEP {
                last_report = downloaded;
                let elapsed = started.elapsed().as_secs_f64().max(0.001);
                let speed = downloaded as f64 / elapsed;
                let eta = total
                    .filter(|t| *t > downloaded && speed > 0.0)
                    .map(|t| (t - downloaded) as f64 / speed);
                hook.on_event(RawProgressEvent::downloading(downloaded, total, Some(speed), eta));
            }
        }

        file.flush()
            .await
            .map_err(|e| (FailureKind::Unknown, format!("flush failed: {}", e)))?;
        hook.on_event(RawProgressEvent::finished());
        Ok(downloaded)
    }
}

#[async_trait]
impl VideoEngine for DirectDownloader {
    fn name(&self) -> &str {
        "direct"
    }

    async fn extract_info(&self, url: &str, options: &EngineOptions) -> AppResult<Option<VideoInfo>> {
        let response = self
            .client
            .head(url)
            .timeout(options.timeout)
            .send()
            .await?
            .error_for_status()?;

        let headers = response.headers();
        let filesize = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("");

        if !content_type.is_empty()
            && !content_type.starts_with("video/")
            && !content_type.starts_with("audio/")
            && !content_type.starts_with("application/octet-stream")
        {
            log::info!("Direct link {} serves {}, not media", url, content_type);
            return Ok(None);
        }

        let ext = extension_from_url(url);
        Ok(Some(VideoInfo {
            url: url.to_string(),
            title: file_name_from_url(url).unwrap_or_else(|| format!("video.{}", ext)),
            platform: Some(Platform::Direct),
            formats: vec![FormatInfo {
                format_id: "direct".to_string(),
                ext,
                filesize,
                ..FormatInfo::default()
            }],
            webpage_url: Some(url.to_string()),
            ..VideoInfo::default()
        }))
    }

    async fn download(&self, url: &str, options: &EngineOptions, hook: SharedHook) -> DownloadOutcome {
        let dest = resolve_output_path(&options.output_template, &extension_from_url(url));
        let result = tokio::time::timeout(
            options.timeout,
            self.stream_to_file(url, &dest, options.max_filesize, &hook),
        )
        .await;

        let failure = match result {
            Ok(Ok(bytes)) => {
                log::info!("Direct download of {} finished: {} bytes", url, bytes);
                return DownloadOutcome::Success { path: dest };
            }
            Ok(Err((kind, message))) => (kind, message),
            Err(_) => (FailureKind::Timeout, format!("direct download exceeded {:?}", options.timeout)),
        };

        if let Err(e) = tokio::fs::remove_file(&dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove partial file {}: {}", dest.display(), e);
            }
        }
        log::warn!("Direct download of {} failed ({}): {}", url, failure.0, failure.1);
        DownloadOutcome::failure(failure.0, failure.1)
    }
}
