//! One in-flight download and its state machine.
//!
//! Identity fields never change after creation. Mutable state sits behind a
//! per-task mutex owned by whichever flow is processing the task; the
//! cancellation flag is a separate atomic so a cancel handler can set it
//! without touching that lock.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::core::error::{AppError, AppResult};
use crate::core::validation::{detect_platform, Platform};
use crate::download::engine::VideoInfo;
use crate::download::formats::Quality;
use crate::download::progress::ProgressUpdate;
use crate::download::ytdlp_errors::FailureKind;

/// Generates a new task ID: 32 lowercase hex characters from a random UUID.
pub fn generate_task_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Download lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Pending,
    Downloading,
    Merging,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Merging => "merging",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// Staying in the same non-terminal state is allowed and is a no-op.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if self.is_terminal() {
            return false;
        }
        if *self == next || next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Merging)
                | (Downloading, Uploading)
                | (Downloading, Failed)
                | (Merging, Uploading)
                | (Merging, Failed)
                | (Uploading, Completed)
                | (Uploading, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable part of a task.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub status: TaskStatus,
    pub video_info: Option<VideoInfo>,
    pub quality: Option<Quality>,
    /// Percentage in `[0, 100]`
    pub progress: f64,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second
    pub speed: f64,
    /// Seconds remaining
    pub eta: Option<u64>,
    pub file_path: Option<PathBuf>,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            video_info: None,
            quality: None,
            progress: 0.0,
            downloaded_bytes: 0,
            total_bytes: 0,
            speed: 0.0,
            eta: None,
            file_path: None,
            error: None,
            failure_kind: None,
            completed_at: None,
        }
    }
}

/// An active download.
#[derive(Debug)]
pub struct DownloadTask {
    pub id: String,
    pub user_id: i64,
    pub chat_id: i64,
    /// Status message edited with progress
    pub message_id: i32,
    pub url: String,
    pub platform: Platform,
    pub created_at: DateTime<Utc>,
    state: Mutex<TaskState>,
    cancelled: AtomicBool,
}

impl DownloadTask {
    pub fn new(id: impl Into<String>, user_id: i64, chat_id: i64, message_id: i32, url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            user_id,
            chat_id,
            message_id,
            platform: detect_platform(&url),
            url,
            created_at: Utc::now(),
            state: Mutex::new(TaskState::default()),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Attaches extracted metadata at construction time.
    pub fn with_video_info(self, info: VideoInfo) -> Self {
        self.lock_state().video_info = Some(info);
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        // State stays consistent across a panic mid-update, so poisoning is ignored
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> TaskStatus {
        self.lock_state().status
    }

    /// Copy of the current mutable state.
    pub fn snapshot(&self) -> TaskState {
        self.lock_state().clone()
    }

    pub fn video_info(&self) -> Option<VideoInfo> {
        self.lock_state().video_info.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.lock_state().video_info.as_ref().map(|i| i.title.clone())
    }

    pub fn quality(&self) -> Option<Quality> {
        self.lock_state().quality
    }

    pub fn set_quality(&self, quality: Quality) {
        self.lock_state().quality = Some(quality);
    }

    /// Moves to `next`, rejecting illegal transitions.
    pub fn transition(&self, next: TaskStatus) -> AppResult<()> {
        let mut state = self.lock_state();
        if !state.status.can_transition_to(next) {
            return Err(AppError::Validation(format!(
                "task {}: illegal transition {} -> {}",
                self.id, state.status, next
            )));
        }
        if state.status != next {
            log::debug!("Task {} (user {}): {} -> {}", self.id, self.user_id, state.status, next);
        }
        state.status = next;
        if next.is_terminal() {
            state.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Claims a pending task for download.
    ///
    /// Only the first caller wins; a cancelled or already started task is left alone.
    pub fn start(&self) -> bool {
        let mut state = self.lock_state();
        if state.status != TaskStatus::Pending || self.is_cancelled() {
            return false;
        }
        state.status = TaskStatus::Downloading;
        log::debug!("Task {} (user {}): pending -> downloading", self.id, self.user_id);
        true
    }

    /// Cancels a task nobody is processing yet.
    ///
    /// Returns `true` if the task was pending and is now cancelled; a running
    /// task only gets its flag set and is finished by its owning flow.
    pub fn cancel_if_pending(&self) -> bool {
        let mut state = self.lock_state();
        self.cancelled.store(true, Ordering::SeqCst);
        if state.status != TaskStatus::Pending {
            return false;
        }
        state.status = TaskStatus::Cancelled;
        state.completed_at = Some(Utc::now());
        true
    }

    /// Terminal failure with a categorized reason.
    pub fn fail(&self, kind: FailureKind, message: impl Into<String>) -> AppResult<()> {
        self.transition(TaskStatus::Failed)?;
        let mut state = self.lock_state();
        state.failure_kind = Some(kind);
        state.error = Some(message.into());
        Ok(())
    }

    /// Stores the progress figures `update` carries; the status is left alone.
    pub fn record_progress(&self, update: &ProgressUpdate) {
        let mut state = self.lock_state();
        if let Some(progress) = update.progress.filter(|p| p.is_finite()) {
            state.progress = progress.clamp(0.0, 100.0);
        }
        if let Some(downloaded) = update.downloaded {
            state.downloaded_bytes = downloaded;
        }
        if let Some(total) = update.total {
            state.total_bytes = total;
        }
        if let Some(speed) = update.speed {
            state.speed = speed;
        }
        if update.eta.is_some() {
            state.eta = update.eta;
        }
    }

    pub fn set_file_path(&self, path: PathBuf) {
        self.lock_state().file_path = Some(path);
    }

    pub fn file_path(&self) -> Option<PathBuf> {
        self.lock_state().file_path.clone()
    }

    /// Requests cooperative cancellation.
    ///
    /// Returns `true` when this call set the flag. The flag is never cleared.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
