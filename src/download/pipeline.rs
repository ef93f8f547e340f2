//! Download-and-deliver flow for one task.
//!
//! Runs after the user picked a quality for a pending task:
//!   claim task → download with progress → cancellation checkpoint → size check
//!   → upload → history/counters → cleanup
//!
//! Every path ends in exactly one final status change (an edit through
//! [`ProgressTracker::complete`], or deletion of the status message after a
//! successful upload) and removes the task from the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use fluent_templates::fluent_bundle::FluentArgs;
use unic_langid::LanguageIdentifier;

use crate::core::error::{AppError, AppResult};
use crate::core::utils::{escape_html, format_duration, format_file_size, truncate_text};
use crate::core::validation::Platform;
use crate::download::cleanup::remove_file_quietly;
use crate::download::engine::{DownloadOutcome, EngineOptions, SharedHook, VideoEngine};
use crate::download::formats::{is_audio_extension, Quality};
use crate::download::hook::ProgressAdapter;
use crate::download::progress::{ProgressTracker, ProgressUpdate};
use crate::download::registry::TaskRegistry;
use crate::download::task::{DownloadTask, TaskStatus};
use crate::download::ytdlp_errors::FailureKind;
use crate::i18n;
use crate::storage::cookies::{self, CookieCipher};
use crate::storage::db::{self, DbPool, HistoryStatus, NewDownload};
use crate::telegram::sink::{ChatSink, FileKind, Keyboard, KeyboardButton};

/// Collaborators of the pipeline, shared by all tasks.
#[derive(Clone)]
pub struct PipelineDeps {
    pub sink: Arc<dyn ChatSink>,
    pub registry: Arc<TaskRegistry>,
    pub pool: Arc<DbPool>,
    /// Engine for everything but direct links
    pub engine: Arc<dyn VideoEngine>,
    /// Engine for [`Platform::Direct`] links
    pub direct: Arc<dyn VideoEngine>,
    pub cipher: &'static CookieCipher,
    pub download_dir: PathBuf,
    /// Largest file the chat platform accepts
    pub max_file_size: u64,
    pub progress_interval: Duration,
}

impl PipelineDeps {
    pub fn engine_for(&self, platform: Platform) -> &Arc<dyn VideoEngine> {
        if platform == Platform::Direct {
            &self.direct
        } else {
            &self.engine
        }
    }

    /// Decrypted cookies of `user_id` for `platform`, if any are stored and valid.
    pub fn stored_cookie(&self, user_id: i64, platform: Platform) -> Option<String> {
        if platform == Platform::Direct {
            return None;
        }
        let netscape = db::get_connection(&self.pool)
            .map_err(AppError::from)
            .and_then(|conn| cookies::get_cookie(&conn, self.cipher, user_id, platform));
        match netscape {
            Ok(content) => content,
            Err(e) => {
                log::warn!("User {}: cannot load {} cookies: {}", user_id, platform, e);
                None
            }
        }
    }

    /// Writes `netscape` into a private cookie file in the download folder.
    pub fn cookie_file(&self, name: &str, netscape: &str) -> Option<PathBuf> {
        match cookies::write_cookie_file(&self.download_dir, name, netscape) {
            Ok(path) => Some(path),
            Err(e) => {
                log::warn!("Cannot write cookie file {}: {}", name, e);
                None
            }
        }
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Completed,
    /// Download failed
    Failed(FailureKind),
    /// Downloaded, but the file could not be delivered
    DeliveryFailed,
    Cancelled,
    /// Unexpected error; the user got the generic failure message
    Aborted,
    /// No such task (expired or already finished)
    NotFound,
    /// The caller does not own the task
    NotOwner,
    /// Another run already claimed the task
    AlreadyStarted,
}

/// Localized message for a download failure.
pub fn failure_text(lang: &LanguageIdentifier, kind: FailureKind, max_file_size: u64) -> String {
    if kind == FailureKind::FileTooLarge {
        let mut args = FluentArgs::new();
        args.set("limit", format_file_size(max_file_size));
        i18n::t_args(lang, kind.message_key(), &args)
    } else {
        i18n::t(lang, kind.message_key())
    }
}

/// Localized message for a downloaded file over the sending limit.
pub fn upload_too_large_text(lang: &LanguageIdentifier, size: u64, max_file_size: u64) -> String {
    let mut args = FluentArgs::new();
    args.set("size", format_file_size(size));
    args.set("limit", format_file_size(max_file_size));
    i18n::t_args(lang, "errors-upload-too-large", &args)
}

fn cancel_keyboard(lang: &LanguageIdentifier, task_id: &str) -> Keyboard {
    Keyboard::new(vec![vec![KeyboardButton::new(
        i18n::t(lang, "buttons-cancel"),
        format!("cancel:{}", task_id),
    )]])
}

/// Downloads and delivers task `task_id` in `quality` for `user_id`.
pub async fn run_download(
    deps: &PipelineDeps,
    user_id: i64,
    task_id: &str,
    quality: Quality,
    lang: &LanguageIdentifier,
) -> PipelineOutcome {
    // ── Step 1: Claim the task ──
    let Some(task) = deps.registry.get(task_id).await else {
        log::info!("Task {} requested by user {} is gone", task_id, user_id);
        return PipelineOutcome::NotFound;
    };
    if task.user_id != user_id {
        log::warn!("User {} tried to start task {} of user {}", user_id, task.id, task.user_id);
        return PipelineOutcome::NotOwner;
    }
    if !task.start() {
        log::info!("Task {} is already {}", task.id, task.status());
        return PipelineOutcome::AlreadyStarted;
    }
    task.set_quality(quality);

    log::info!(
        "Task {} (user {}, chat {}): downloading {} as {}",
        task.id,
        task.user_id,
        task.chat_id,
        task.url,
        quality.label()
    );

    let tracker = Arc::new(
        ProgressTracker::new(Arc::clone(&deps.sink), task.chat_id, task.message_id, lang.clone())
            .with_min_interval(deps.progress_interval)
            .with_keyboard(cancel_keyboard(lang, &task.id)),
    );

    let mut run = Run {
        deps,
        task: &task,
        tracker: &tracker,
        lang,
        quality,
        cookie_file: None,
        download_path: None,
    };

    let outcome = match run.execute().await {
        Ok(outcome) => outcome,
        Err(e) => {
            log::error!("Task {} (user {}): unexpected error: {}", task.id, task.user_id, e);
            if !task.status().is_terminal() {
                let _ = task.fail(FailureKind::Unknown, e.to_string());
            }
            tracker.complete(&i18n::t(lang, "errors-generic")).await;
            run.record_failure(FailureKind::Unknown, &e.to_string(), 0);
            PipelineOutcome::Aborted
        }
    };

    // ── Step 9: Cleanup ──
    run.cleanup().await;
    deps.registry.remove(&task.id).await;
    log::info!("Task {} (user {}) finished: {:?}", task.id, task.user_id, outcome);
    outcome
}

/// Per-run state for one pipeline execution.
struct Run<'a> {
    deps: &'a PipelineDeps,
    task: &'a Arc<DownloadTask>,
    tracker: &'a Arc<ProgressTracker>,
    lang: &'a LanguageIdentifier,
    quality: Quality,
    cookie_file: Option<PathBuf>,
    download_path: Option<PathBuf>,
}

impl Run<'_> {
    async fn execute(&mut self) -> AppResult<PipelineOutcome> {
        let task = self.task;

        // ── Step 2: Initial status ──
        self.tracker
            .update(
                ProgressUpdate::new()
                    .status(TaskStatus::Downloading)
                    .progress(0.0)
                    .quality(self.quality.label())
                    .force(),
            )
            .await;

        // ── Step 3: Download ──
        let options = self.engine_options();
        let engine = self.deps.engine_for(task.platform);
        let (adapter, drain) = ProgressAdapter::spawn(Arc::clone(self.tracker), Some(Arc::clone(task)));
        let hook: SharedHook = adapter;
        let result = engine.download(&task.url, &options, Arc::clone(&hook)).await;
        drop(hook);
        if let Err(e) = drain.await {
            log::warn!("Progress drain of task {} ended abnormally: {}", task.id, e);
        }

        if let Some(path) = self.cookie_file.take() {
            remove_file_quietly(&path).await;
        }

        let path = match result {
            DownloadOutcome::Success { path } => {
                task.set_file_path(path.clone());
                self.download_path = Some(path.clone());
                path
            }
            DownloadOutcome::Failure { kind, message } => {
                // ── Step 4: Cancellation wins over a failure caused by it ──
                if task.is_cancelled() {
                    return Ok(self.finish_cancelled().await);
                }
                // ── Step 5: Download failure ──
                return Ok(self.finish_failed(kind, &message).await);
            }
        };

        // ── Step 6: Checkpoint before upload, then size check ──
        if task.is_cancelled() {
            return Ok(self.finish_cancelled().await);
        }

        let size = tokio::fs::metadata(&path).await?.len();
        if size > self.deps.max_file_size {
            log::warn!(
                "Task {} (user {}): {} exceeds the upload limit of {}",
                task.id,
                task.user_id,
                format_file_size(size),
                format_file_size(self.deps.max_file_size)
            );
            // Over the sending limit is a delivery failure, not a download one
            task.fail(FailureKind::FileTooLarge, format!("file is {} bytes", size))?;
            self.tracker.complete(&upload_too_large_text(self.lang, size, self.deps.max_file_size)).await;
            self.record_failure(FailureKind::FileTooLarge, &format!("upload skipped: file is {} bytes", size), size);
            return Ok(PipelineOutcome::DeliveryFailed);
        }

        // ── Step 7: Upload ──
        task.transition(TaskStatus::Uploading)?;
        self.tracker.set_status(TaskStatus::Uploading).await;

        let kind = if is_audio_extension(&extension_of(&path)) {
            FileKind::Audio
        } else {
            FileKind::Video
        };
        let caption = self.caption(size);

        if let Err(e) = self.deps.sink.send_file(task.chat_id, &path, &caption, kind).await {
            // ── Step 8b: Delivery failure ──
            log::error!("Task {} (user {}): upload failed: {}", task.id, task.user_id, e);
            task.fail(FailureKind::Unknown, e.to_string())?;
            self.tracker.complete(&i18n::t(self.lang, "errors-upload-failed")).await;
            self.record_failure(FailureKind::Unknown, &format!("upload failed: {}", e), size);
            return Ok(PipelineOutcome::DeliveryFailed);
        }

        // ── Step 8a: Delivered ──
        task.transition(TaskStatus::Completed)?;
        if let Err(e) = self.deps.sink.delete_message(task.chat_id, task.message_id).await {
            log::debug!("Could not delete status message of task {}: {}", task.id, e);
            self.tracker.complete(&i18n::t(self.lang, "download-completed")).await;
        }
        self.record_success(size);
        Ok(PipelineOutcome::Completed)
    }

    fn engine_options(&mut self) -> EngineOptions {
        let task = self.task;
        let template = self.deps.download_dir.join(format!("{}.%(ext)s", task.id));

        EngineOptions {
            format_selector: self.quality.selector(),
            output_template: template.to_string_lossy().into_owned(),
            cookie_file: self.prepare_cookie_file(),
            extract_audio: self.quality.is_audio(),
            max_filesize: Some(self.deps.max_file_size),
            ..EngineOptions::default()
        }
    }

    /// Decrypts the user's cookie for this platform into a temporary file.
    fn prepare_cookie_file(&mut self) -> Option<PathBuf> {
        let task = self.task;
        let netscape = self.deps.stored_cookie(task.user_id, task.platform)?;
        let path = self.deps.cookie_file(&task.id, &netscape)?;
        log::debug!("Task {}: using stored {} cookies", task.id, task.platform);
        self.cookie_file = Some(path.clone());
        Some(path)
    }

    fn caption(&self, size: u64) -> String {
        let title = self.task.title().unwrap_or_else(|| self.task.url.clone());
        let duration = self
            .task
            .video_info()
            .and_then(|info| info.duration)
            .map(format_duration)
            .unwrap_or_else(|| i18n::t(self.lang, "common-na"));

        let mut args = FluentArgs::new();
        args.set("title", escape_html(&truncate_text(&title, 200)));
        args.set("quality", self.quality.label());
        args.set("size", format_file_size(size));
        args.set("duration", duration);
        i18n::t_args(self.lang, "download-caption", &args)
    }

    async fn finish_cancelled(&mut self) -> PipelineOutcome {
        let task = self.task;
        if let Err(e) = task.transition(TaskStatus::Cancelled) {
            log::debug!("{}", e);
        }
        if let Some(path) = self.download_path.take() {
            remove_file_quietly(&path).await;
        }
        self.tracker.complete(&i18n::t(self.lang, "download-cancelled")).await;
        log::info!("Task {} (user {}) cancelled", task.id, task.user_id);
        PipelineOutcome::Cancelled
    }

    async fn finish_failed(&mut self, kind: FailureKind, message: &str) -> PipelineOutcome {
        let task = self.task;
        let level = if kind.is_operational() {
            log::Level::Warn
        } else {
            log::Level::Info
        };
        log::log!(
            level,
            "Task {} (user {}, chat {}) failed ({}): {}",
            task.id,
            task.user_id,
            task.chat_id,
            kind,
            message
        );
        if let Err(e) = task.fail(kind, message) {
            log::debug!("{}", e);
        }
        self.tracker
            .complete(&failure_text(self.lang, kind, self.deps.max_file_size))
            .await;

        if kind == FailureKind::LoginRequired && task.platform != Platform::Direct {
            if let Ok(conn) = db::get_connection(&self.deps.pool) {
                if let Err(e) = cookies::invalidate_cookie(&conn, task.user_id, task.platform) {
                    log::warn!("Task {}: cannot invalidate cookies: {}", task.id, e);
                }
            }
        }

        self.record_failure(kind, message, 0);
        PipelineOutcome::Failed(kind)
    }

    fn record_success(&self, size: u64) {
        self.deps.registry.record_outcome(true);
        self.write_history(HistoryStatus::Completed, size, None);
    }

    fn record_failure(&self, kind: FailureKind, message: &str, size: u64) {
        self.deps.registry.record_outcome(false);
        let error = format!("{}: {}", kind.as_str(), truncate_text(message, 500));
        self.write_history(HistoryStatus::Failed, size, Some(&error));
    }

    fn write_history(&self, status: HistoryStatus, size: u64, error: Option<&str>) {
        let task = self.task;
        let info = task.video_info();
        let title = info
            .as_ref()
            .map(|i| i.title.clone())
            .unwrap_or_else(|| task.url.clone());
        let quality = self.quality.as_str();

        let conn = match db::get_connection(&self.deps.pool) {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Task {}: no database connection for history: {}", task.id, e);
                return;
            }
        };

        let success = status == HistoryStatus::Completed;
        if let Err(e) = db::increment_download_count(&conn, task.user_id, success, size) {
            log::error!("Task {}: failed to update user counters: {}", task.id, e);
        }

        let entry = NewDownload {
            user_id: task.user_id,
            url: &task.url,
            title: &title,
            platform: task.platform.as_str(),
            quality: &quality,
            file_size: size,
            duration: info.as_ref().and_then(|i| i.duration).unwrap_or(0),
            status,
            error_message: error,
        };
        if let Err(e) = db::add_download_history(&conn, &entry) {
            log::error!("Task {}: failed to write history: {}", task.id, e);
        }
    }

    async fn cleanup(&mut self) {
        if let Some(path) = self.cookie_file.take() {
            remove_file_quietly(&path).await;
        }
        if let Some(path) = self.download_path.take() {
            remove_file_quietly(&path).await;
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}
