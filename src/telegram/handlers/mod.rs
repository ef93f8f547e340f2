//! Telegram bot handler tree configuration
//!
//! Handlers talk to the chat through [`ChatSink`](crate::telegram::sink::ChatSink),
//! so integration tests drive the same functions production uses.

mod admin;
mod callbacks;
mod commands;
mod documents;
mod downloads;
mod schema;
mod types;

pub use callbacks::handle_callback;
pub use documents::{handle_cookie_document, IncomingDocument};
pub use downloads::{expire_pending_tasks, handle_url_message, video_info_cache_key, UrlOutcome};
pub use schema::{run_command, schema};
pub use types::{register_user, Caller, HandlerDeps, HandlerError, UserInfo};
