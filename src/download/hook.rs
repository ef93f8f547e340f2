//! Bridge from the engine's worker thread to the async progress tracker.
//!
//! The engine calls [`ProgressHook::on_event`] synchronously from a blocking
//! thread. The adapter only pushes the translated update into an unbounded
//! channel, which never blocks; a task on the runtime drains the channel and
//! applies updates to the tracker one at a time, in arrival order.

use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;

use crate::download::engine::{ProgressHook, RawProgressEvent};
use crate::download::progress::{ProgressTracker, ProgressUpdate};
use crate::download::task::{DownloadTask, TaskStatus};

/// Translates a raw engine event into a tracker update.
///
/// Returns `None` for events that should not touch the status message.
pub fn translate_event(event: &RawProgressEvent) -> Option<ProgressUpdate> {
    match event.status.as_str() {
        "downloading" => {
            let downloaded = event.downloaded_bytes.unwrap_or(0);
            let total = event.total();
            let progress = if total > 0 {
                downloaded as f64 / total as f64 * 100.0
            } else {
                0.0
            };

            let mut update = ProgressUpdate::new()
                .status(TaskStatus::Downloading)
                .progress(progress)
                .bytes(downloaded, total);
            if let Some(speed) = event.speed {
                update = update.speed(speed);
            }
            if let Some(eta) = event.eta.filter(|e| e.is_finite() && *e >= 0.0) {
                update = update.eta(eta as u64);
            }
            Some(update)
        }
        // Raw download is done; merging may still follow
        "finished" => Some(
            ProgressUpdate::new()
                .status(TaskStatus::Merging)
                .progress(100.0)
                .force(),
        ),
        "error" => {
            log::warn!("Engine reported a progress error event");
            None
        }
        other => {
            log::debug!("Ignoring progress event with status {:?}", other);
            None
        }
    }
}

/// [`ProgressHook`] that forwards events to a [`ProgressTracker`].
pub struct ProgressAdapter {
    tx: UnboundedSender<ProgressUpdate>,
    task: Option<Arc<DownloadTask>>,
}

impl ProgressAdapter {
    /// Starts the drain task and returns the hook plus the drain handle.
    ///
    /// The drain task ends once every clone of the returned hook is dropped,
    /// after applying every queued update. Await the handle before the final
    /// status edit so no stale progress lands after it.
    pub fn spawn(tracker: Arc<ProgressTracker>, task: Option<Arc<DownloadTask>>) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let handle = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                tracker.update(update).await;
            }
        });
        (Arc::new(Self { tx, task }), handle)
    }
}

impl ProgressHook for ProgressAdapter {
    fn on_event(&self, event: RawProgressEvent) {
        let Some(update) = translate_event(&event) else {
            return;
        };

        if let Some(task) = &self.task {
            if update.status == Some(TaskStatus::Merging) {
                if let Err(e) = task.transition(TaskStatus::Merging) {
                    log::debug!("{}", e);
                }
            }
            task.record_progress(&update);
        }

        if self.tx.send(update).is_err() {
            log::debug!("Progress drain task is gone; dropping update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downloading_computes_percentage() {
        let event = RawProgressEvent::downloading(25, Some(100), Some(10.0), Some(7.9));
        let update = translate_event(&event).unwrap();
        assert_eq!(update.status, Some(TaskStatus::Downloading));
        assert_eq!(update.progress, Some(25.0));
        assert_eq!(update.downloaded, Some(25));
        assert_eq!(update.total, Some(100));
        assert_eq!(update.eta, Some(7));
        assert!(!update.force);
    }

    #[test]
    fn unknown_total_means_zero_progress() {
        let event = RawProgressEvent::downloading(4096, None, None, None);
        let update = translate_event(&event).unwrap();
        assert_eq!(update.progress, Some(0.0));
        assert_eq!(update.total, Some(0));
        assert_eq!(update.speed, None);
    }

    #[test]
    fn finished_forces_merging() {
        let update = translate_event(&RawProgressEvent::finished()).unwrap();
        assert_eq!(update.status, Some(TaskStatus::Merging));
        assert_eq!(update.progress, Some(100.0));
        assert!(update.force);
    }

    #[test]
    fn error_and_unknown_events_are_dropped() {
        assert!(translate_event(&RawProgressEvent::error()).is_none());
        let odd = RawProgressEvent {
            status: "postprocessing".to_string(),
            ..RawProgressEvent::default()
        };
        assert!(translate_event(&odd).is_none());
    }
}
