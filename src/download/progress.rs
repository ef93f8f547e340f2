//! Debounced progress reporting into a single status message.
//!
//! Progress events can arrive many times per second. The tracker merges each
//! one into a snapshot and edits the chat message at most once per interval,
//! skipping edits that would not change the text. Flood-control responses
//! make the tracker sleep while holding its lock, so every later update of the
//! same task is throttled too.

use std::sync::Arc;
use std::time::Duration;

use fluent_templates::fluent_bundle::FluentArgs;
use tokio::sync::Mutex;
use tokio::time::Instant;
use unic_langid::LanguageIdentifier;

use crate::core::config;
use crate::core::utils::{format_duration, format_file_size, format_speed, progress_bar};
use crate::download::task::TaskStatus;
use crate::i18n;
use crate::telegram::sink::{ChatSink, Keyboard, SinkError};

/// Fields of the displayed progress. Everything is optional except status.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub status: TaskStatus,
    /// Percentage in `[0, 100]`
    pub progress: f64,
    pub downloaded: u64,
    /// 0 when unknown
    pub total: u64,
    pub speed: f64,
    pub eta: Option<u64>,
    pub quality: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            status: TaskStatus::Pending,
            progress: 0.0,
            downloaded: 0,
            total: 0,
            speed: 0.0,
            eta: None,
            quality: None,
        }
    }
}

/// Partial update; unset fields keep their previous value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub downloaded: Option<u64>,
    pub total: Option<u64>,
    pub speed: Option<f64>,
    pub eta: Option<u64>,
    pub quality: Option<String>,
    /// Bypass the debounce interval
    pub force: bool,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn bytes(mut self, downloaded: u64, total: u64) -> Self {
        self.downloaded = Some(downloaded);
        self.total = Some(total);
        self
    }

    pub fn speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn eta(mut self, eta: u64) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = Some(quality.into());
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// What an [`ProgressTracker::update`] call ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The message was edited
    Sent,
    /// Too soon after the previous edit
    Debounced,
    /// The text equals the last sent text
    Unchanged,
    /// The platform reported the edit as a no-op
    NotModified,
    /// The platform demanded a pause; the tracker slept for it
    FloodWait(Duration),
    /// Any other edit error; logged and ignored
    Failed(String),
}

struct TrackerState {
    snapshot: ProgressSnapshot,
    last_text: Option<String>,
    last_update: Option<Instant>,
}

/// Rate-limited status message for one task.
pub struct ProgressTracker {
    sink: Arc<dyn ChatSink>,
    chat_id: i64,
    message_id: i32,
    lang: LanguageIdentifier,
    min_interval: Duration,
    keyboard: Option<Keyboard>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(sink: Arc<dyn ChatSink>, chat_id: i64, message_id: i32, lang: LanguageIdentifier) -> Self {
        Self {
            sink,
            chat_id,
            message_id,
            lang,
            min_interval: config::progress::update_interval(),
            keyboard: None,
            state: Mutex::new(TrackerState {
                snapshot: ProgressSnapshot::default(),
                last_text: None,
                last_update: None,
            }),
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Keyboard attached to every intermediate edit (e.g. a cancel button).
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.state.lock().await.snapshot.clone()
    }

    /// Merges `update` and edits the message unless debounced or unchanged.
    ///
    /// The merge always happens, so the next edit shows the latest data.
    pub async fn update(&self, update: ProgressUpdate) -> UpdateOutcome {
        let mut state = self.state.lock().await;
        merge(&mut state.snapshot, &update);

        if !update.force {
            if let Some(last) = state.last_update {
                if last.elapsed() < self.min_interval {
                    return UpdateOutcome::Debounced;
                }
            }
        }

        let text = render(&self.lang, &state.snapshot);
        if state.last_text.as_deref() == Some(text.as_str()) {
            return UpdateOutcome::Unchanged;
        }

        state.last_update = Some(Instant::now());
        let result = self
            .sink
            .edit_message(self.chat_id, self.message_id, &text, self.keyboard.clone())
            .await;

        match result {
            Ok(()) => {
                state.last_text = Some(text);
                UpdateOutcome::Sent
            }
            Err(SinkError::NotModified) => {
                state.last_text = Some(text);
                UpdateOutcome::NotModified
            }
            Err(SinkError::FloodWait(wait)) => {
                log::warn!(
                    "Flood control on progress message {} in chat {}: waiting {:?}",
                    self.message_id,
                    self.chat_id,
                    wait
                );
                tokio::time::sleep(wait).await;
                UpdateOutcome::FloodWait(wait)
            }
            Err(SinkError::Other(e)) => {
                log::warn!(
                    "Failed to edit progress message {} in chat {}: {}",
                    self.message_id,
                    self.chat_id,
                    e
                );
                UpdateOutcome::Failed(e)
            }
        }
    }

    /// Switches phase and shows it immediately.
    pub async fn set_status(&self, status: TaskStatus) -> UpdateOutcome {
        self.update(ProgressUpdate::new().status(status).force()).await
    }

    /// Final edit with `text`.
    ///
    /// Unconditional: no debounce and no dedupe, so calling it twice sends the
    /// text twice. A flood-control response is waited out and retried once.
    pub async fn complete(&self, text: &str) -> bool {
        let mut state = self.state.lock().await;
        let mut attempt = self.sink.edit_message(self.chat_id, self.message_id, text, None).await;

        if let Err(SinkError::FloodWait(wait)) = attempt {
            tokio::time::sleep(wait).await;
            attempt = self.sink.edit_message(self.chat_id, self.message_id, text, None).await;
        }

        state.last_update = Some(Instant::now());
        match attempt {
            Ok(()) | Err(SinkError::NotModified) => {
                state.last_text = Some(text.to_string());
                true
            }
            Err(e) => {
                log::error!(
                    "Failed to set final status of message {} in chat {}: {}",
                    self.message_id,
                    self.chat_id,
                    e
                );
                false
            }
        }
    }
}

fn merge(snapshot: &mut ProgressSnapshot, update: &ProgressUpdate) {
    if let Some(status) = update.status {
        snapshot.status = status;
    }
    if let Some(progress) = update.progress {
        snapshot.progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
    }
    if let Some(downloaded) = update.downloaded {
        snapshot.downloaded = downloaded;
    }
    if let Some(total) = update.total {
        snapshot.total = total;
    }
    if let Some(speed) = update.speed {
        snapshot.speed = speed;
    }
    if let Some(eta) = update.eta {
        snapshot.eta = Some(eta);
    }
    if let Some(quality) = &update.quality {
        snapshot.quality = Some(quality.clone());
    }
}

/// Localized status text for a snapshot.
pub fn render(lang: &LanguageIdentifier, snapshot: &ProgressSnapshot) -> String {
    match snapshot.status {
        TaskStatus::Downloading => {
            let unknown = i18n::t(lang, "common-unknown");
            let total = if snapshot.total > 0 {
                format_file_size(snapshot.total)
            } else {
                unknown.clone()
            };
            let eta = snapshot.eta.map(format_duration).unwrap_or(unknown);
            let quality = snapshot.quality.clone().unwrap_or_else(|| i18n::t(lang, "common-na"));

            let mut args = FluentArgs::new();
            args.set("quality", quality);
            args.set("bar", progress_bar(snapshot.progress, config::progress::BAR_WIDTH));
            args.set("percent", format!("{:.1}%", snapshot.progress));
            args.set("downloaded", format_file_size(snapshot.downloaded));
            args.set("total", total);
            args.set("speed", format_speed(snapshot.speed));
            args.set("eta", eta);
            i18n::t_args(lang, "download-progress", &args)
        }
        TaskStatus::Merging => i18n::t(lang, "download-merging"),
        TaskStatus::Uploading => i18n::t(lang, "download-uploading"),
        TaskStatus::Pending => i18n::t(lang, "download-starting"),
        _ => i18n::t(lang, "common-processing"),
    }
}
