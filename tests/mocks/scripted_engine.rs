//! Video engine with canned metadata and download results

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use vidgrab::core::error::{AppError, AppResult};
use vidgrab::download::engine::{
    DownloadOutcome, EngineOptions, FormatInfo, RawProgressEvent, SharedHook, VideoEngine, VideoInfo,
};
use vidgrab::download::FailureKind;

type FinishHook = Box<dyn FnOnce() + Send>;

enum Extraction {
    Info(VideoInfo),
    Nothing,
    Error(String),
}

enum Download {
    /// Writes this many bytes to `<template with ext>`
    File { ext: String, size: usize },
    Fail(FailureKind, String),
}

/// Returns what the test scripted, in place of a real engine.
pub struct ScriptedEngine {
    extraction: Mutex<Extraction>,
    download: Mutex<Download>,
    /// Progress events emitted before the download finishes
    events: Mutex<Vec<RawProgressEvent>>,
    /// Runs once, after the file is written
    on_finish: Mutex<Option<FinishHook>>,
    extract_calls: AtomicUsize,
    last_options: Mutex<Option<EngineOptions>>,
}

impl ScriptedEngine {
    pub fn new(info: VideoInfo) -> Self {
        Self {
            extraction: Mutex::new(Extraction::Info(info)),
            download: Mutex::new(Download::File {
                ext: "mp4".to_string(),
                size: 1024,
            }),
            events: Mutex::new(Vec::new()),
            on_finish: Mutex::new(None),
            extract_calls: AtomicUsize::new(0),
            last_options: Mutex::new(None),
        }
    }

    /// A public video offering `heights`.
    pub fn with_heights(title: &str, heights: &[u32]) -> Self {
        Self::new(video_info(title, heights))
    }

    pub fn extracts_nothing(self) -> Self {
        *self.extraction.lock().unwrap() = Extraction::Nothing;
        self
    }

    pub fn extraction_fails(self, stderr: &str) -> Self {
        *self.extraction.lock().unwrap() = Extraction::Error(stderr.to_string());
        self
    }

    pub fn downloads_file(self, ext: &str, size: usize) -> Self {
        *self.download.lock().unwrap() = Download::File {
            ext: ext.to_string(),
            size,
        };
        self
    }

    pub fn download_fails(self, kind: FailureKind, message: &str) -> Self {
        *self.download.lock().unwrap() = Download::Fail(kind, message.to_string());
        self
    }

    pub fn with_events(self, events: Vec<RawProgressEvent>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    /// Runs `hook` after the file is written, before `download` returns.
    pub fn on_finish(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_finish.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<EngineOptions> {
        self.last_options.lock().unwrap().clone()
    }
}

/// Metadata with one mp4 format per height plus an audio-only format.
pub fn video_info(title: &str, heights: &[u32]) -> VideoInfo {
    let mut formats: Vec<FormatInfo> = heights
        .iter()
        .map(|h| FormatInfo {
            format_id: format!("v{}", h),
            ext: "mp4".to_string(),
            height: Some(*h),
            vcodec: Some("avc1".to_string()),
            acodec: Some("none".to_string()),
            ..FormatInfo::default()
        })
        .collect();
    formats.push(FormatInfo {
        format_id: "a140".to_string(),
        ext: "m4a".to_string(),
        vcodec: Some("none".to_string()),
        acodec: Some("mp4a".to_string()),
        ..FormatInfo::default()
    });

    VideoInfo {
        title: title.to_string(),
        duration: Some(212),
        uploader: Some("Test Channel".to_string()),
        view_count: Some(1_234_567),
        formats,
        ..VideoInfo::default()
    }
}

#[async_trait]
impl VideoEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn extract_info(&self, url: &str, _options: &EngineOptions) -> AppResult<Option<VideoInfo>> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        match &*self.extraction.lock().unwrap() {
            Extraction::Info(info) => Ok(Some(VideoInfo {
                url: url.to_string(),
                ..info.clone()
            })),
            Extraction::Nothing => Ok(None),
            Extraction::Error(stderr) => Err(AppError::Download(stderr.clone())),
        }
    }

    async fn download(&self, _url: &str, options: &EngineOptions, hook: SharedHook) -> DownloadOutcome {
        *self.last_options.lock().unwrap() = Some(options.clone());

        let events = self.events.lock().unwrap().clone();
        for event in events {
            hook.on_event(event);
        }

        let (ext, size) = match &*self.download.lock().unwrap() {
            Download::File { ext, size } => (ext.clone(), *size),
            Download::Fail(kind, message) => {
                hook.on_event(RawProgressEvent::error());
                return DownloadOutcome::failure(*kind, message.clone());
            }
        };

        let path = PathBuf::from(options.output_template.replace("%(ext)s", &ext));
        if let Err(e) = std::fs::write(&path, vec![0u8; size]) {
            return DownloadOutcome::failure(FailureKind::Unknown, e.to_string());
        }
        hook.on_event(RawProgressEvent::finished());

        let finish = self.on_finish.lock().unwrap().take();
        if let Some(finish) = finish {
            finish();
        }
        DownloadOutcome::Success { path }
    }
}
