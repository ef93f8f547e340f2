//! Vidgrab - Telegram bot that downloads videos from links
//!
//! Users send a link, pick a quality on an inline keyboard and get the file
//! back in the chat. Downloads run through yt-dlp (or plain HTTP for direct
//! links) with live progress in the status message.
//!
//! # Module Structure
//!
//! - `core`: Configuration, errors, logging, rate limiting and common helpers
//! - `download`: Task registry, progress tracking, engines and the download pipeline
//! - `storage`: SQLite database, migrations and the encrypted cookie store
//! - `telegram`: Bot setup, guards, keyboards and update handlers
//! - `i18n`: Fluent translations

pub mod core;
pub mod download;
pub mod i18n;
pub mod storage;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppError, AppResult};
pub use download::{run_download, DownloadTask, TaskRegistry};
pub use storage::db::{create_pool, get_connection, DbConnection, DbPool};
