//! Minimal chat interface used by the download flow.
//!
//! The pipeline and the progress tracker only need to send, edit and delete
//! messages and upload files. They talk to [`ChatSink`] so tests can record
//! calls instead of hitting the Bot API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};

use crate::core::utils::extract_retry_after;

/// A single inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl KeyboardButton {
    pub fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Inline keyboard as rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keyboard {
    pub rows: Vec<Vec<KeyboardButton>>,
}

impl Keyboard {
    pub fn new(rows: Vec<Vec<KeyboardButton>>) -> Self {
        Self { rows }
    }

    /// Every button, row by row.
    pub fn buttons(&self) -> impl Iterator<Item = &KeyboardButton> {
        self.rows.iter().flatten()
    }
}

impl From<Keyboard> for InlineKeyboardMarkup {
    fn from(keyboard: Keyboard) -> Self {
        InlineKeyboardMarkup::new(keyboard.rows.into_iter().map(|row| {
            row.into_iter()
                .map(|b| InlineKeyboardButton::callback(b.text, b.callback_data))
                .collect::<Vec<_>>()
        }))
    }
}

/// How an uploaded file is presented in the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Video,
    Audio,
}

/// Chat operation failures, classified the way callers react to them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SinkError {
    /// The edit would not change the message
    #[error("message is not modified")]
    NotModified,
    /// The platform asks the caller to wait before the next request
    #[error("flood control: retry after {0:?}")]
    FloodWait(Duration),
    #[error("{0}")]
    Other(String),
}

impl From<RequestError> for SinkError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(secs) => Self::FloodWait(secs.duration()),
            RequestError::Api(ApiError::MessageNotModified) => Self::NotModified,
            other => {
                let text = other.to_string();
                if text.to_lowercase().contains("message is not modified") {
                    Self::NotModified
                } else if let Some(secs) = extract_retry_after(&text) {
                    Self::FloodWait(Duration::from_secs(secs))
                } else {
                    Self::Other(text)
                }
            }
        }
    }
}

/// Chat operations the download flow depends on.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Sends an HTML message; returns its message ID.
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<i32, SinkError>;

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), SinkError>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), SinkError>;

    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str, kind: FileKind) -> Result<(), SinkError>;

    /// Fetches an incoming file into `dest`.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), SinkError>;
}

/// [`ChatSink`] backed by the Bot API.
#[derive(Clone)]
pub struct TelegramSink {
    bot: Bot,
}

impl TelegramSink {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatSink for TelegramSink {
    async fn send_message(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Result<i32, SinkError> {
        let mut request = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(InlineKeyboardMarkup::from(keyboard));
        }
        let message = request.await?;
        Ok(message.id.0)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<Keyboard>,
    ) -> Result<(), SinkError> {
        let mut request = self
            .bot
            .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(InlineKeyboardMarkup::from(keyboard));
        }
        request.await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), SinkError> {
        self.bot.delete_message(ChatId(chat_id), MessageId(message_id)).await?;
        Ok(())
    }

    async fn send_file(&self, chat_id: i64, path: &Path, caption: &str, kind: FileKind) -> Result<(), SinkError> {
        let input = InputFile::file(path.to_path_buf());
        match kind {
            FileKind::Video => {
                self.bot
                    .send_video(ChatId(chat_id), input)
                    .caption(caption)
                    .parse_mode(ParseMode::Html)
                    .supports_streaming(true)
                    .await?;
            }
            FileKind::Audio => {
                self.bot
                    .send_audio(ChatId(chat_id), input)
                    .caption(caption)
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
        }
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<(), SinkError> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;
        let mut dst = tokio::fs::File::create(dest)
            .await
            .map_err(|e| SinkError::Other(format!("cannot create {}: {}", dest.display(), e)))?;
        self.bot
            .download_file(&file.path, &mut dst)
            .await
            .map_err(|e| SinkError::Other(e.to_string()))?;
        log::debug!("Fetched file {} ({} bytes) into {}", file_id, file.size, dest.display());
        Ok(())
    }
}
