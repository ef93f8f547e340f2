//! User command implementations (/start, /help, /language, /quality, /history, /mystats, /cancel, cookies)

use chrono::Utc;
use fluent_templates::fluent_bundle::FluentArgs;

use super::types::{Caller, HandlerDeps, HandlerError};
use crate::core::utils::{escape_html, format_file_size, truncate_text};
use crate::core::validation::Platform;
use crate::download::Quality;
use crate::i18n;
use crate::storage::cookies;
use crate::storage::db::{self, HistoryStatus};
use crate::telegram::keyboards::{cookie_delete_keyboard, default_quality_keyboard, language_keyboard};

/// Rows shown by /history
const HISTORY_LIMIT: u32 = 10;
const HISTORY_TITLE_CHARS: usize = 40;

/// Handle /start command
pub async fn handle_start(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let name = caller
        .user
        .as_ref()
        .map(db::User::display_name)
        .or_else(|| caller.info.first_name.clone())
        .unwrap_or_else(|| caller.id().to_string());

    let mut args = FluentArgs::new();
    args.set("name", escape_html(&name));
    deps.reply(caller.chat_id, &i18n::t_args(&caller.lang, "start-welcome", &args), None)
        .await;
    Ok(())
}

pub async fn handle_help(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    deps.reply(caller.chat_id, &i18n::t(&caller.lang, "help-text"), None).await;
    Ok(())
}

pub async fn handle_language(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let current = caller.lang.language.as_str();
    deps.reply(
        caller.chat_id,
        &i18n::t(&caller.lang, "language-choose"),
        Some(language_keyboard(current)),
    )
    .await;
    Ok(())
}

/// Localized name of a quality (`1080p`, "Best available", "Audio only").
pub fn quality_name(lang: &unic_langid::LanguageIdentifier, quality: Quality) -> String {
    match quality {
        Quality::Height(_) => quality.label(),
        Quality::Best => i18n::t(lang, "quality-best"),
        Quality::Audio => i18n::t(lang, "quality-audio"),
    }
}

pub async fn handle_quality(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let current = caller.default_quality();
    let mut args = FluentArgs::new();
    args.set("current", quality_name(&caller.lang, current));
    deps.reply(
        caller.chat_id,
        &i18n::t_args(&caller.lang, "quality-choose", &args),
        Some(default_quality_keyboard(&caller.lang, Some(current))),
    )
    .await;
    Ok(())
}

/// Renders the newest history rows.
pub fn format_history(lang: &unic_langid::LanguageIdentifier, records: &[db::DownloadRecord]) -> String {
    if records.is_empty() {
        return i18n::t(lang, "history-empty");
    }

    let mut args = FluentArgs::new();
    args.set("count", records.len());
    let mut lines = vec![i18n::t_args(lang, "history-title", &args), String::new()];

    for record in records {
        let status_key = if record.status == HistoryStatus::Completed.as_str() {
            "history-status-completed"
        } else {
            "history-status-failed"
        };
        let title = record.title.as_deref().filter(|t| !t.is_empty()).unwrap_or(&record.url);
        // "YYYY-MM-DD HH:MM"
        let date: String = record.created_at.chars().take(16).collect();

        let mut args = FluentArgs::new();
        args.set("status", i18n::t(lang, status_key));
        args.set("title", escape_html(&truncate_text(title, HISTORY_TITLE_CHARS)));
        args.set("date", date);
        args.set("size", format_file_size(record.file_size.max(0) as u64));
        args.set(
            "quality",
            record.quality.clone().unwrap_or_else(|| i18n::t(lang, "common-na")),
        );
        lines.push(i18n::t_args(lang, "history-item", &args));
    }
    lines.join("\n")
}

pub async fn handle_history(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let conn = db::get_connection(deps.pool())?;
    let records = db::get_download_history(&conn, caller.id(), HISTORY_LIMIT, 0)?;
    deps.reply(caller.chat_id, &format_history(&caller.lang, &records), None)
        .await;
    Ok(())
}

pub async fn handle_mystats(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    let Some(user) = caller.user.as_ref() else {
        deps.reply(caller.chat_id, &i18n::t(lang, "errors-generic"), None).await;
        return Ok(());
    };

    let limits = &deps.policy.limits;
    let (daily_limit, concurrent_limit) = limits.for_user(caller.is_vip());
    let daily_used = daily_limit.saturating_sub(deps.rate_window.remaining(caller.id(), daily_limit, limits.window));
    let concurrent_used = deps.registry().count_for_user(caller.id()).await;

    let status = if user.is_vip_active(Utc::now()) {
        let expiry = user
            .vip_expiry
            .map(|e| e.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "∞".to_string());
        let mut args = FluentArgs::new();
        args.set("expiry", expiry);
        i18n::t_args(lang, "mystats-status-vip", &args)
    } else {
        i18n::t(lang, "mystats-status-normal")
    };
    let success_rate = if user.total_downloads > 0 {
        format!(
            "{:.1}%",
            user.successful_downloads as f64 / user.total_downloads as f64 * 100.0
        )
    } else {
        i18n::t(lang, "common-na")
    };

    let mut args = FluentArgs::new();
    args.set("status", status);
    args.set("total", user.total_downloads);
    args.set("successful", user.successful_downloads);
    args.set("failed", user.failed_downloads);
    args.set("success_rate", success_rate);
    args.set("total_size", format_file_size(user.total_size.max(0) as u64));
    args.set("daily_used", daily_used);
    args.set("daily_limit", daily_limit);
    args.set("concurrent_used", concurrent_used);
    args.set("concurrent_limit", concurrent_limit);
    deps.reply(caller.chat_id, &i18n::t_args(lang, "mystats-text", &args), None)
        .await;
    Ok(())
}

/// Handle /cancel: flags every task of the caller.
///
/// Tasks still waiting for a quality pick are finished here; running ones
/// are finished by their pipeline at its next checkpoint.
pub async fn handle_cancel(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    let tasks = deps.registry().list_for_user(caller.id()).await;
    if tasks.is_empty() {
        deps.reply(caller.chat_id, &i18n::t(lang, "cancel-none"), None).await;
        return Ok(());
    }

    deps.registry().cancel_all_for_user(caller.id()).await;
    for task in &tasks {
        if task.cancel_if_pending() {
            deps.registry().remove(&task.id).await;
            if let Err(e) = deps
                .sink()
                .edit_message(task.chat_id, task.message_id, &i18n::t(lang, "download-cancelled"), None)
                .await
            {
                log::warn!("Task {}: failed to edit cancelled message: {}", task.id, e);
            }
            log::info!("Task {} (user {}) cancelled before start", task.id, task.user_id);
        }
    }

    let mut args = FluentArgs::new();
    args.set("count", tasks.len());
    deps.reply(caller.chat_id, &i18n::t_args(lang, "cancel-done", &args), None)
        .await;
    Ok(())
}

pub async fn handle_cookie(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    deps.reply(caller.chat_id, &i18n::t(&caller.lang, "cookie-instructions"), None)
        .await;
    Ok(())
}

pub async fn handle_listcookies(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    let conn = db::get_connection(deps.pool())?;
    let stored = cookies::list_cookies(&conn, caller.id())?;
    if stored.is_empty() {
        deps.reply(caller.chat_id, &i18n::t(lang, "cookie-list-empty"), None).await;
        return Ok(());
    }

    let list = stored
        .iter()
        .map(|c| {
            let platform = Platform::parse(&c.platform).display_name();
            let mut line = format!("• <b>{}</b>", escape_html(platform));
            if let Some(expires_at) = c.expires_at {
                line.push_str(&format!(" (→ {})", expires_at.format("%Y-%m-%d")));
            }
            if !c.is_valid {
                line.push_str(" ⚠️");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut args = FluentArgs::new();
    args.set("list", list);
    let platforms: Vec<String> = stored.into_iter().map(|c| c.platform).collect();
    deps.reply(
        caller.chat_id,
        &i18n::t_args(lang, "cookie-list", &args),
        Some(cookie_delete_keyboard(&platforms)),
    )
    .await;
    Ok(())
}

/// Deletes the caller's cookies for `platform`; returns the reply text.
pub fn delete_cookie_text(deps: &HandlerDeps, caller: &Caller, platform: &str) -> Result<String, HandlerError> {
    let lang = &caller.lang;
    let platform = platform.trim();
    if platform.is_empty() {
        return Ok(i18n::t(lang, "cookie-delete-usage"));
    }

    let platform = Platform::parse(platform);
    let conn = db::get_connection(deps.pool())?;
    if cookies::delete_cookie(&conn, caller.id(), platform)? {
        log::info!("User {} deleted {} cookies", caller.id(), platform.as_str());
        let mut args = FluentArgs::new();
        args.set("platform", platform.display_name());
        Ok(i18n::t_args(lang, "cookie-deleted", &args))
    } else {
        Ok(i18n::t(lang, "cookie-not-found"))
    }
}

pub async fn handle_deletecookie(deps: &HandlerDeps, caller: &Caller, platform: &str) -> Result<(), HandlerError> {
    let text = delete_cookie_text(deps, caller, platform)?;
    deps.reply(caller.chat_id, &text, None).await;
    Ok(())
}
