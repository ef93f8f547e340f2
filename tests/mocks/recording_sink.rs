//! Chat sink that records every call

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use vidgrab::telegram::sink::{ChatSink, FileKind, Keyboard, SinkError};

/// One recorded chat operation.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCall {
    Send {
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Edit {
        chat_id: i64,
        message_id: i32,
        text: String,
        keyboard: Option<Keyboard>,
    },
    Delete {
        chat_id: i64,
        message_id: i32,
    },
    File {
        chat_id: i64,
        path: PathBuf,
        caption: String,
        kind: FileKind,
    },
}

/// Records calls in order; message IDs count up from 100.
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    next_id: AtomicI32,
    fail_uploads: AtomicBool,
    /// Every edit answers "message is not modified"
    not_modified: AtomicBool,
    /// Answers for the next edits, consumed one per edit
    flood_waits: Mutex<VecDeque<Duration>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_id: AtomicI32::new(100),
            fail_uploads: AtomicBool::new(false),
            not_modified: AtomicBool::new(false),
            flood_waits: Mutex::new(VecDeque::new()),
        }
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every `send_file` fail.
    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub fn answer_not_modified(&self) {
        self.not_modified.store(true, Ordering::SeqCst);
    }

    /// The next `times` edits answer with flood control for `wait`.
    pub fn answer_flood_wait(&self, wait: Duration, times: usize) {
        self.flood_waits.lock().unwrap().extend(std::iter::repeat(wait).take(times));
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Edits of one message, oldest first.
    pub fn edits_of(&self, message_id: i32) -> Vec<(String, Option<Keyboard>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Edit {
                    message_id: id,
                    text,
                    keyboard,
                    ..
                } if id == message_id => Some((text, keyboard)),
                _ => None,
            })
            .collect()
    }

    pub fn last_edit_of(&self, message_id: i32) -> Option<(String, Option<Keyboard>)> {
        self.edits_of(message_id).pop()
    }

    pub fn files(&self) -> Vec<(PathBuf, String, FileKind)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::File {
                    path, caption, kind, ..
                } => Some((path, caption, kind)),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<i32> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Delete { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SinkCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ChatSink for RecordingSink {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<i32, SinkError> {
        let message_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(SinkCall::Send {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(message_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), SinkError> {
        self.record(SinkCall::Edit {
            chat_id,
            message_id,
            text: text.to_string(),
            keyboard,
        });
        if let Some(wait) = self.flood_waits.lock().unwrap().pop_front() {
            return Err(SinkError::FloodWait(wait));
        }
        if self.not_modified.load(Ordering::SeqCst) {
            return Err(SinkError::NotModified);
        }
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), SinkError> {
        self.record(SinkCall::Delete { chat_id, message_id });
        Ok(())
    }

    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str, kind: FileKind) -> Result<(), SinkError> {
        self.record(SinkCall::File {
            chat_id,
            path: path.to_path_buf(),
            caption: caption.to_string(),
            kind,
        });
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(SinkError::Other("Request Entity Too Large".to_string()));
        }
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), SinkError> {
        Err(SinkError::Other(format!("no file {} for {}", file_id, dest.display())))
    }
}
