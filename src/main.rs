use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Days, Utc};
use dotenvy::dotenv;
use teloxide::prelude::*;
use teloxide::update_listeners::Polling;
use tokio::time::{interval, sleep};

use vidgrab::core::rate_limiter::RateWindow;
use vidgrab::core::{config, init_logger, log_startup_configuration};
use vidgrab::download::cleanup::spawn_cleanup_task;
use vidgrab::download::direct::DirectDownloader;
use vidgrab::download::ytdlp::{self, YtDlpEngine};
use vidgrab::download::{PipelineDeps, TaskRegistry};
use vidgrab::storage::cookies::cookie_cipher;
use vidgrab::storage::db::{self, DbPool};
use vidgrab::telegram::guards::AccessPolicy;
use vidgrab::telegram::handlers::expire_pending_tasks;
use vidgrab::telegram::{create_bot, schema, setup_bot_commands, HandlerDeps, TelegramSink};

/// Dispatcher restarts after a panic before giving up
const MAX_DISPATCHER_RETRIES: u32 = 5;

/// Main entry point for the Telegram bot
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot creation).
/// Missing required configuration exits with code 1.
#[tokio::main]
async fn main() -> Result<()> {
    // Set up global panic handler so a panicking handler is logged
    std::panic::set_hook(Box::new(|panic_info| {
        log::error!("Panic caught: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            log::error!("Panic at {}:{}:{}", location.file(), location.line(), location.column());
        }
        if let Some(msg) = panic_info.payload().downcast_ref::<&str>() {
            log::error!("Panic message: {}", msg);
        }
    }));

    let _ = dotenv();
    init_logger(&config::LOG_FILE_PATH, &config::LOG_LEVEL)?;

    if let Err(e) = config::validate() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log_startup_configuration();

    let download_dir = PathBuf::from(config::DOWNLOAD_FOLDER.as_str());
    std::fs::create_dir_all(&download_dir)?;

    let db_pool = Arc::new(db::create_pool(&config::DATABASE_PATH)?);
    ytdlp::log_version(&config::YTDL_BIN).await;

    let bot = create_bot()?;
    let me = bot.get_me().await?;
    log::info!("Bot started as @{}", me.username());
    if let Err(e) = setup_bot_commands(&bot).await {
        log::warn!("Failed to register bot commands: {}", e);
    }

    let registry = Arc::new(TaskRegistry::new());
    let rate_window = Arc::new(RateWindow::new());
    let pipeline = PipelineDeps {
        sink: Arc::new(TelegramSink::new(bot.clone())),
        registry: Arc::clone(&registry),
        pool: Arc::clone(&db_pool),
        engine: Arc::new(YtDlpEngine::from_config()),
        direct: Arc::new(DirectDownloader::new()?),
        cipher: cookie_cipher(),
        download_dir: download_dir.clone(),
        max_file_size: *config::limits::MAX_FILE_SIZE,
        progress_interval: config::progress::update_interval(),
    };
    let deps = HandlerDeps::new(pipeline, Arc::clone(&rate_window), Arc::new(AccessPolicy::from_config()));

    // ── Background jobs ──
    spawn_cleanup_task(download_dir, config::cleanup::interval(), config::cleanup::max_age());
    Arc::clone(&rate_window).spawn_cleanup_task(config::limits::daily_window(), config::cleanup::interval());
    spawn_daily_jobs(Arc::clone(&db_pool));
    spawn_housekeeping(deps.clone());

    // Run the dispatcher, restarting it if it panics
    let handler = schema(deps);
    let mut retry_count = 0;
    loop {
        let bot = bot.clone();
        let handler = handler.clone();
        let handle = tokio::spawn(async move {
            let listener = Polling::builder(bot.clone()).drop_pending_updates().build();
            Dispatcher::builder(bot, handler)
                .enable_ctrlc_handler()
                .build()
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await
        });

        match handle.await {
            Ok(()) => {
                log::info!("Dispatcher shutdown gracefully");
                break;
            }
            Err(join_err) if join_err.is_panic() && retry_count < MAX_DISPATCHER_RETRIES => {
                retry_count += 1;
                log::error!(
                    "Dispatcher panicked: {}. Restarting (attempt {}/{})",
                    join_err,
                    retry_count,
                    MAX_DISPATCHER_RETRIES
                );
                sleep(Duration::from_secs(2u64.pow(retry_count))).await;
            }
            Err(join_err) => {
                log::error!("Dispatcher stopped: {}", join_err);
                break;
            }
        }
    }

    Ok(())
}

/// Time left until the next midnight UTC.
fn until_next_midnight() -> Duration {
    let now = Utc::now();
    let next = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc());
    next.and_then(|next| (next - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}

/// Midnight UTC: statistics snapshot of the finished day, daily counter reset, VIP expiry.
fn spawn_daily_jobs(db_pool: Arc<DbPool>) {
    tokio::spawn(async move {
        loop {
            sleep(until_next_midnight()).await;
            let conn = match db::get_connection(&db_pool) {
                Ok(conn) => conn,
                Err(e) => {
                    log::error!("Failed to get DB connection for daily jobs: {}", e);
                    continue;
                }
            };

            if let Some(yesterday) = Utc::now().date_naive().checked_sub_days(Days::new(1)) {
                match db::record_daily_statistics(&conn, yesterday) {
                    Ok(stats) => log::info!(
                        "Statistics for {}: {} downloads ({} ok, {} failed), {} users",
                        stats.date,
                        stats.total_downloads,
                        stats.successful_downloads,
                        stats.failed_downloads,
                        stats.unique_users
                    ),
                    Err(e) => log::error!("Failed to record daily statistics: {}", e),
                }
            }
            match db::reset_daily_counters(&conn) {
                Ok(count) => log::info!("Reset daily counters of {} user(s)", count),
                Err(e) => log::error!("Failed to reset daily counters: {}", e),
            }
            if let Err(e) = db::expire_vips(&conn) {
                log::error!("Failed to expire VIP status: {}", e);
            }
        }
    });
}

/// Hourly: VIP expiry sweep, stale metadata cache entries and abandoned quality pickers.
fn spawn_housekeeping(deps: HandlerDeps) {
    tokio::spawn(async move {
        let mut interval = interval(config::cleanup::interval());
        loop {
            interval.tick().await;
            match db::get_connection(deps.pool()) {
                Ok(conn) => {
                    if let Err(e) = db::expire_vips(&conn) {
                        log::error!("Failed to expire VIP status: {}", e);
                    }
                }
                Err(e) => log::error!("Failed to get DB connection for VIP expiry: {}", e),
            }

            let purged = deps.registry().purge_cache(config::cache::ttl()).await;
            if purged > 0 {
                log::debug!("Purged {} stale cache entries", purged);
            }
            expire_pending_tasks(&deps, config::download::pending_ttl()).await;
        }
    });
}
