//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - A startup summary of the effective configuration

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config;

/// Maps a level name from the environment onto a filter, defaulting to `Info`.
pub fn parse_level(raw: &str) -> LevelFilter {
    match raw.trim().to_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `level` - Level name, see [`parse_level`]
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to create the file or a logger was already installed
pub fn init_logger(log_file_path: &str, level: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;
    let level = parse_level(level);

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Logs the effective configuration at application startup.
///
/// Secrets are never printed; only whether they are present.
pub fn log_startup_configuration() {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("yt-dlp binary: {}", *config::YTDL_BIN);
    log::info!("Download folder: {}", *config::DOWNLOAD_FOLDER);
    log::info!("Database: {}", *config::DATABASE_PATH);
    log::info!("Admins configured: {}", config::admin::ADMIN_IDS.len());
    log::info!(
        "Limits: daily {} / concurrent {} (VIP {} / {}), global {}",
        *config::limits::DAILY_LIMIT,
        *config::limits::CONCURRENT_LIMIT,
        *config::limits::VIP_DAILY_LIMIT,
        *config::limits::VIP_CONCURRENT_LIMIT,
        *config::limits::GLOBAL_CONCURRENT_LIMIT
    );
    log::info!("Max file size: {} bytes", *config::limits::MAX_FILE_SIZE);

    match config::BOT_API_URL.as_deref() {
        Some(url) => log::info!("Bot API server: {}", url),
        None => log::info!("Bot API server: api.telegram.org"),
    }

    if config::cookies::ENCRYPTION_KEY.is_none() {
        log::warn!("ENCRYPTION_KEY not set: stored cookies will not survive a restart");
    }

    if *config::maintenance::ENABLED {
        log::warn!("Maintenance mode is ON: only the owner can use the bot");
    }
}
