//! Inline keyboard callbacks.

use fluent_templates::fluent_bundle::FluentArgs;

use super::commands::{delete_cookie_text, quality_name};
use super::types::{Caller, HandlerDeps, HandlerError};
use crate::download::pipeline::run_download;
use crate::download::{Quality, TaskStatus};
use crate::i18n;
use crate::storage::db;
use crate::telegram::guards::{GuardChain, GuardOutcome};
use crate::telegram::keyboards::CallbackAction;

/// Handles one callback query.
///
/// `message_id` is the message carrying the keyboard. Returns the text of the
/// toast to answer the query with, if any.
pub async fn handle_callback(
    deps: &HandlerDeps,
    caller: &Caller,
    message_id: i32,
    data: &str,
) -> Result<Option<String>, HandlerError> {
    let lang = &caller.lang;
    let Some(action) = CallbackAction::parse(data) else {
        log::warn!("User {} sent unknown callback data {:?}", caller.id(), data);
        return Ok(Some(i18n::t(lang, "errors-generic")));
    };

    if let GuardOutcome::Reject(text) = caller.guard(deps, &GuardChain::user()).await {
        return Ok(Some(text));
    }

    match action {
        CallbackAction::Download { task_id, quality } => start_download(deps, caller, &task_id, quality).await,
        CallbackAction::Cancel { task_id } => cancel_task(deps, caller, &task_id).await,
        CallbackAction::Language(code) => {
            let Some(code) = i18n::is_language_supported(&code) else {
                return Ok(Some(i18n::t(lang, "errors-generic")));
            };
            {
                let conn = db::get_connection(deps.pool())?;
                db::set_language(&conn, caller.id(), code)?;
            }
            let new_lang = i18n::lang_from_code(code);
            let mut args = FluentArgs::new();
            args.set("language", i18n::language_name(code));
            edit(deps, caller, message_id, &i18n::t_args(&new_lang, "language-changed", &args)).await;
            Ok(None)
        }
        CallbackAction::SetQuality(quality) => {
            {
                let conn = db::get_connection(deps.pool())?;
                db::set_default_quality(&conn, caller.id(), &quality.as_str())?;
            }
            let mut args = FluentArgs::new();
            args.set("quality", quality_name(lang, quality));
            edit(deps, caller, message_id, &i18n::t_args(lang, "quality-changed", &args)).await;
            Ok(None)
        }
        CallbackAction::DeleteCookie(platform) => {
            let text = delete_cookie_text(deps, caller, &platform)?;
            edit(deps, caller, message_id, &text).await;
            Ok(None)
        }
    }
}

async fn edit(deps: &HandlerDeps, caller: &Caller, message_id: i32, text: &str) {
    if let Err(e) = deps.sink().edit_message(caller.chat_id, message_id, text, None).await {
        log::warn!("Failed to edit message {} in chat {}: {}", message_id, caller.chat_id, e);
    }
}

/// Checks ownership, then runs the pipeline in the background.
async fn start_download(
    deps: &HandlerDeps,
    caller: &Caller,
    task_id: &str,
    quality: Quality,
) -> Result<Option<String>, HandlerError> {
    let lang = &caller.lang;
    let Some(task) = deps.registry().get(task_id).await else {
        return Ok(Some(i18n::t(lang, "errors-task-not-found")));
    };
    if task.user_id != caller.id() {
        return Ok(Some(i18n::t(lang, "errors-not-your-task")));
    }
    // Simultaneous clicks are still settled by the pipeline's claim
    if task.status() != TaskStatus::Pending {
        log::info!("User {} picked a quality for task {} which is already {}", caller.id(), task.id, task.status());
        return Ok(Some(i18n::t(lang, "errors-already-started")));
    }

    let pipeline = deps.pipeline.clone();
    let user_id = caller.id();
    let task_id = task_id.to_string();
    let lang = lang.clone();
    tokio::spawn(async move {
        run_download(&pipeline, user_id, &task_id, quality, &lang).await;
    });
    Ok(None)
}

/// Pending tasks are finished here; running ones at their next checkpoint.
async fn cancel_task(deps: &HandlerDeps, caller: &Caller, task_id: &str) -> Result<Option<String>, HandlerError> {
    let lang = &caller.lang;
    let Some(task) = deps.registry().get(task_id).await else {
        return Ok(Some(i18n::t(lang, "errors-task-not-found")));
    };
    if task.user_id != caller.id() {
        return Ok(Some(i18n::t(lang, "errors-not-your-task")));
    }

    if task.cancel_if_pending() {
        deps.registry().remove(&task.id).await;
        edit(deps, caller, task.message_id, &i18n::t(lang, "download-cancelled")).await;
        log::info!("Task {} (user {}) cancelled before start", task.id, task.user_id);
        return Ok(None);
    }

    log::info!("User {} requested cancellation of task {}", caller.id(), task.id);
    Ok(Some(i18n::t(lang, "download-cancel-requested")))
}
