//! Admin and owner commands: /stats, /ban, /unban, /cleanup, /setvip

use std::time::Duration;

use chrono::Utc;
use fluent_templates::fluent_bundle::FluentArgs;

use super::types::{Caller, HandlerDeps, HandlerError};
use crate::core::config;
use crate::core::utils::{escape_html, format_file_size, format_uptime};
use crate::download::cleanup::cleanup_temp_files;
use crate::i18n;
use crate::storage::db;

/// VIP length when /setvip gets no day count
pub const DEFAULT_VIP_DAYS: i64 = 30;

/// Splits `"<user_id> rest..."` into the ID and the trimmed rest.
pub fn parse_target(args: &str) -> Option<(i64, &str)> {
    let args = args.trim();
    let (id, rest) = args.split_once(char::is_whitespace).unwrap_or((args, ""));
    let id = id.parse::<i64>().ok().filter(|id| *id > 0)?;
    Some((id, rest.trim()))
}

pub async fn handle_stats(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let counts = {
        let conn = db::get_connection(deps.pool())?;
        db::get_user_counts(&conn)?
    };
    let stats = deps.registry().stats().await;

    let mut args = FluentArgs::new();
    args.set("uptime", format_uptime(stats.uptime));
    args.set("users", counts.total);
    args.set("active", counts.active);
    args.set("vip", counts.vip);
    args.set("banned", counts.banned);
    args.set("total", stats.total);
    args.set("successful", stats.successful);
    args.set("failed", stats.failed);
    args.set("success_rate", stats.success_rate);
    args.set("active_tasks", stats.active_tasks);
    args.set("cache_size", stats.cache_size);
    deps.reply(caller.chat_id, &i18n::t_args(&caller.lang, "stats-text", &args), None)
        .await;
    Ok(())
}

pub async fn handle_ban(deps: &HandlerDeps, caller: &Caller, args: &str) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    if args.trim().is_empty() {
        deps.reply(caller.chat_id, &i18n::t(lang, "admin-ban-usage"), None).await;
        return Ok(());
    }
    let Some((target, reason)) = parse_target(args) else {
        deps.reply(caller.chat_id, &i18n::t(lang, "admin-invalid-user-id"), None)
            .await;
        return Ok(());
    };

    let reason = if reason.is_empty() {
        i18n::t(lang, "admin-ban-default-reason")
    } else {
        reason.to_string()
    };
    {
        let conn = db::get_connection(deps.pool())?;
        db::set_ban(&conn, target, Some(&reason))?;
    }
    let cancelled = deps.registry().cancel_all_for_user(target).await;
    log::info!(
        "Admin {} banned user {} ({}), {} task(s) cancelled",
        caller.id(),
        target,
        reason,
        cancelled
    );

    let mut fargs = FluentArgs::new();
    fargs.set("user_id", target.to_string());
    fargs.set("reason", escape_html(&reason));
    deps.reply(caller.chat_id, &i18n::t_args(lang, "admin-ban-success", &fargs), None)
        .await;
    Ok(())
}

pub async fn handle_unban(deps: &HandlerDeps, caller: &Caller, args: &str) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    if args.trim().is_empty() {
        deps.reply(caller.chat_id, &i18n::t(lang, "admin-unban-usage"), None).await;
        return Ok(());
    }
    let Some((target, _)) = parse_target(args) else {
        deps.reply(caller.chat_id, &i18n::t(lang, "admin-invalid-user-id"), None)
            .await;
        return Ok(());
    };

    {
        let conn = db::get_connection(deps.pool())?;
        db::set_ban(&conn, target, None)?;
    }
    log::info!("Admin {} unbanned user {}", caller.id(), target);

    let mut fargs = FluentArgs::new();
    fargs.set("user_id", target.to_string());
    deps.reply(caller.chat_id, &i18n::t_args(lang, "admin-unban-success", &fargs), None)
        .await;
    Ok(())
}

/// Handle /cleanup: sweeps temp files older than an hour.
pub async fn handle_cleanup(deps: &HandlerDeps, caller: &Caller) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    deps.reply(caller.chat_id, &i18n::t(lang, "admin-cleanup-started"), None)
        .await;

    let dir = deps.pipeline.download_dir.clone();
    let max_age = Duration::from_secs(config::cleanup::MANUAL_MAX_AGE_HOURS * 3600);
    let report = tokio::task::spawn_blocking(move || cleanup_temp_files(&dir, max_age)).await??;
    log::info!(
        "Admin {} cleanup removed {} file(s), {} bytes",
        caller.id(),
        report.files,
        report.bytes
    );

    let mut args = FluentArgs::new();
    args.set("files", report.files);
    args.set("size", format_file_size(report.bytes));
    deps.reply(caller.chat_id, &i18n::t_args(lang, "admin-cleanup-completed", &args), None)
        .await;
    Ok(())
}

/// Handle /setvip <user_id> [days]
pub async fn handle_setvip(deps: &HandlerDeps, caller: &Caller, args: &str) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    if args.trim().is_empty() {
        deps.reply(caller.chat_id, &i18n::t(lang, "admin-vip-usage"), None).await;
        return Ok(());
    }
    let parsed = parse_target(args).and_then(|(target, days)| {
        if days.is_empty() {
            Some((target, DEFAULT_VIP_DAYS))
        } else {
            days.parse::<i64>().ok().filter(|d| *d > 0).map(|d| (target, d))
        }
    });
    let Some((target, days)) = parsed else {
        deps.reply(caller.chat_id, &i18n::t(lang, "admin-vip-usage"), None).await;
        return Ok(());
    };

    let expiry = Utc::now() + chrono::Duration::days(days);
    {
        let conn = db::get_connection(deps.pool())?;
        db::set_vip(&conn, target, Some(expiry))?;
    }
    log::info!("Owner {} granted user {} VIP for {} day(s)", caller.id(), target, days);

    let mut fargs = FluentArgs::new();
    fargs.set("user_id", target.to_string());
    fargs.set("expiry", expiry.format("%Y-%m-%d").to_string());
    deps.reply(caller.chat_id, &i18n::t_args(lang, "admin-vip-granted", &fargs), None)
        .await;
    Ok(())
}
