//! URL messages: validation, metadata extraction and the quality picker.

use std::sync::Arc;
use std::time::Duration;

use fluent_templates::fluent_bundle::FluentArgs;
use sha2::{Digest, Sha256};
use unic_langid::LanguageIdentifier;

use super::types::{Caller, HandlerDeps, HandlerError};
use crate::core::config;
use crate::core::error::AppResult;
use crate::core::utils::{escape_html, format_count, format_duration, truncate_text};
use crate::core::validation::{detect_platform, validate_message_url, Platform};
use crate::download::cleanup::remove_file_quietly;
use crate::download::engine::{EngineOptions, VideoInfo};
use crate::download::pipeline::failure_text;
use crate::download::task::{generate_task_id, DownloadTask};
use crate::download::ytdlp_errors::{classify_error, FailureKind};
use crate::i18n;
use crate::telegram::guards::GuardChain;
use crate::telegram::keyboards::quality_keyboard;

const TITLE_CHARS: usize = 100;

/// Cache key of the metadata of `url`.
pub fn video_info_cache_key(url: &str) -> String {
    format!("video_info:{}", hex::encode(Sha256::digest(url.as_bytes())))
}

/// How a URL submission ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlOutcome {
    /// A pending task waits for a quality pick
    Registered { task_id: String },
    /// Not a usable link
    InvalidUrl,
    /// Stopped by a guard
    Rejected,
    /// Extraction failed or the content is not downloadable
    Unavailable,
}

/// Video summary shown above the quality keyboard.
pub fn video_summary(lang: &LanguageIdentifier, info: &VideoInfo) -> String {
    let na = || i18n::t(lang, "common-na");
    let title = if info.title.is_empty() {
        i18n::t(lang, "common-unknown")
    } else {
        info.title.clone()
    };

    let mut args = FluentArgs::new();
    args.set("title", escape_html(&truncate_text(&title, TITLE_CHARS)));
    args.set(
        "uploader",
        info.uploader
            .as_deref()
            .map(escape_html)
            .unwrap_or_else(|| i18n::t(lang, "common-unknown")),
    );
    args.set("duration", info.duration.map(format_duration).unwrap_or_else(na));
    args.set("views", info.view_count.map(format_count).unwrap_or_else(na));
    i18n::t_args(lang, "download-select-quality", &args)
}

/// Handles a text message that should contain a video link.
pub async fn handle_url_message(deps: &HandlerDeps, caller: &Caller, text: &str) -> Result<UrlOutcome, HandlerError> {
    let lang = &caller.lang;

    // ── Step 1: Validate ──
    let url = match validate_message_url(text) {
        Ok(url) => url,
        Err(e) => {
            log::debug!("User {}: {}", caller.id(), e);
            deps.reply(caller.chat_id, &i18n::t(lang, "errors-invalid-url"), None)
                .await;
            return Ok(UrlOutcome::InvalidUrl);
        }
    };

    // ── Step 2: Guards (maintenance, ban, quotas) ──
    if !caller.passes(deps, &GuardChain::download()).await {
        return Ok(UrlOutcome::Rejected);
    }

    let platform = detect_platform(&url);
    log::info!(
        "User {} (chat {}) submitted {} link {}",
        caller.id(),
        caller.chat_id,
        platform,
        url
    );

    // ── Step 3: Status message ──
    let mut args = FluentArgs::new();
    args.set("platform", platform.display_name());
    let Some(message_id) = deps
        .reply(caller.chat_id, &i18n::t_args(lang, "download-extracting", &args), None)
        .await
    else {
        return Ok(UrlOutcome::Unavailable);
    };
    let edit = move |text: String| async move {
        if let Err(e) = deps.sink().edit_message(caller.chat_id, message_id, &text, None).await {
            log::warn!("Failed to edit status message in chat {}: {}", caller.chat_id, e);
        }
    };

    // ── Step 4: Extract ──
    let task_id = generate_task_id();
    let cookie = deps.pipeline.stored_cookie(caller.id(), platform);
    let info = match fetch_video_info(deps, &url, platform, &task_id, cookie.as_deref()).await {
        Ok(Some(info)) => info,
        Ok(None) => {
            log::warn!("User {}: no metadata for {}", caller.id(), url);
            edit(i18n::t(lang, "errors-extraction-failed")).await;
            return Ok(UrlOutcome::Unavailable);
        }
        Err(e) => {
            let kind = classify_error(&e.to_string());
            log::warn!("User {}: extraction of {} failed ({}): {}", caller.id(), url, kind, e);
            let text = if kind == FailureKind::Unknown {
                i18n::t(lang, "errors-extraction-failed")
            } else {
                failure_text(lang, kind, deps.pipeline.max_file_size)
            };
            edit(text).await;
            return Ok(UrlOutcome::Unavailable);
        }
    };

    // ── Step 5: Content checks ──
    if info.is_private {
        edit(i18n::t(lang, "errors-private-video")).await;
        return Ok(UrlOutcome::Unavailable);
    }
    if info.age_restricted && cookie.is_none() {
        edit(i18n::t(lang, "errors-age-restricted")).await;
        return Ok(UrlOutcome::Unavailable);
    }

    // ── Step 6: Register the pending task ──
    let task = DownloadTask::new(task_id.clone(), caller.id(), caller.chat_id, message_id, url.clone())
        .with_video_info(info.clone());
    if let Err(e) = deps.registry().add(Arc::new(task)).await {
        log::error!("User {}: cannot register task {}: {}", caller.id(), task_id, e);
        edit(i18n::t(lang, "errors-generic")).await;
        return Ok(UrlOutcome::Unavailable);
    }

    // ── Step 7: Quality picker ──
    let keyboard = quality_keyboard(&info, &task_id, lang, Some(caller.default_quality()));
    if let Err(e) = deps
        .sink()
        .edit_message(caller.chat_id, message_id, &video_summary(lang, &info), Some(keyboard))
        .await
    {
        log::warn!("Task {}: failed to show quality picker: {}", task_id, e);
    }
    Ok(UrlOutcome::Registered { task_id })
}

/// Metadata for `url`, from the cache when fresh.
async fn fetch_video_info(
    deps: &HandlerDeps,
    url: &str,
    platform: Platform,
    task_id: &str,
    cookie: Option<&str>,
) -> AppResult<Option<VideoInfo>> {
    let key = video_info_cache_key(url);
    if let Some(info) = deps.registry().cache_get::<VideoInfo>(&key, config::cache::ttl()).await {
        log::debug!("Metadata cache hit for {}", url);
        return Ok(Some(info));
    }

    let cookie_file = cookie.and_then(|c| deps.pipeline.cookie_file(&format!("{}.extract", task_id), c));
    let options = EngineOptions {
        cookie_file: cookie_file.clone(),
        timeout: config::download::extract_timeout(),
        ..EngineOptions::default()
    };
    let result = deps.pipeline.engine_for(platform).extract_info(url, &options).await;
    if let Some(path) = cookie_file {
        remove_file_quietly(&path).await;
    }

    let info = result?;
    if let Some(info) = &info {
        deps.registry().cache_set(key, info.clone()).await;
    }
    Ok(info)
}

/// Drops tasks nobody picked a quality for within `max_age`.
pub async fn expire_pending_tasks(deps: &HandlerDeps, max_age: Duration) -> usize {
    let mut expired = 0;
    for task in deps.registry().stale_pending(max_age).await {
        if !task.cancel_if_pending() {
            continue;
        }
        deps.registry().remove(&task.id).await;
        expired += 1;

        let lang = i18n::user_lang_from_pool(deps.pool(), task.user_id);
        if let Err(e) = deps
            .sink()
            .edit_message(task.chat_id, task.message_id, &i18n::t(&lang, "download-cancelled"), None)
            .await
        {
            log::debug!("Task {}: failed to edit expired picker: {}", task.id, e);
        }
    }
    if expired > 0 {
        log::info!("Dropped {} pending task(s) without a quality pick", expired);
    }
    expired
}
