use once_cell::sync::Lazy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::core::error::{AppError, AppResult};

/// Reads an environment variable and parses it, falling back to `default`
/// when the variable is unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Reads a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
fn env_flag(key: &str) -> bool {
    env::var(key).map(|v| parse_flag(&v)).unwrap_or(false)
}

pub(crate) fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Telegram user ID of the bot owner
/// Read from OWNER_ID environment variable; 0 when missing
pub static OWNER_ID: Lazy<i64> = Lazy::new(|| env_or("OWNER_ID", 0));

/// yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Download folder path
/// Read from DOWNLOAD_FOLDER environment variable, supports tilde (~) expansion
/// Default: ./downloads
pub static DOWNLOAD_FOLDER: Lazy<String> = Lazy::new(|| {
    let raw = env::var("DOWNLOAD_FOLDER").unwrap_or_else(|_| "./downloads".to_string());
    shellexpand::tilde(&raw).into_owned()
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: vidgrab.sqlite
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "vidgrab.sqlite".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: vidgrab.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "vidgrab.log".to_string()));

/// Log level name (error, warn, info, debug, trace)
/// Read from LOG_LEVEL environment variable
/// Default: info
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

/// Custom Bot API server URL (local telegram-bot-api)
pub static BOT_API_URL: Lazy<Option<String>> = Lazy::new(|| {
    env::var("BOT_API_URL")
        .ok()
        .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
});

/// Language used for new users and unknown language codes
pub static DEFAULT_LANGUAGE: Lazy<String> =
    Lazy::new(|| env::var("DEFAULT_LANGUAGE").unwrap_or_else(|_| "en".to_string()));

/// Quality preset used for new users ("1080", "720", "best", "audio", ...)
pub static DEFAULT_QUALITY: Lazy<String> =
    Lazy::new(|| env::var("DEFAULT_QUALITY").unwrap_or_else(|_| "1080".to_string()));

/// Checks that every required variable is present.
///
/// Returns `AppError::Config` listing all missing variables.
pub fn validate() -> AppResult<()> {
    let mut missing = Vec::new();
    if BOT_TOKEN.trim().is_empty() {
        missing.push("BOT_TOKEN");
    }
    if *OWNER_ID == 0 {
        missing.push("OWNER_ID");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(AppError::Config(format!(
            "missing required environment variables: {}",
            missing.join(", ")
        )))
    }
}

/// Admin configuration
pub mod admin {
    use once_cell::sync::Lazy;
    use std::env;

    pub(crate) fn parse_admin_ids(raw: &str) -> Vec<i64> {
        raw.split([',', ' ', '\n', '\t'])
            .filter_map(|part| part.trim().parse::<i64>().ok())
            .collect()
    }

    /// Admin user IDs (comma-separated)
    /// Read from ADMIN_IDS environment variable
    pub static ADMIN_IDS: Lazy<Vec<i64>> = Lazy::new(|| {
        env::var("ADMIN_IDS")
            .ok()
            .map(|raw| parse_admin_ids(&raw))
            .unwrap_or_default()
    });
}

/// Per-user quota configuration
pub mod limits {
    use super::{env_or, Duration, Lazy};

    /// Length of the rolling quota window (24 hours)
    pub const DAILY_WINDOW_SECS: u64 = 86_400;

    /// Bot API upload ceiling without a local server (50 MiB)
    pub const STANDARD_FILE_LIMIT: u64 = 50 * 1024 * 1024;

    /// Bot API upload ceiling with a local server (2 GiB)
    pub const LOCAL_SERVER_FILE_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

    /// Downloads allowed per rolling day for regular users
    pub static DAILY_LIMIT: Lazy<usize> = Lazy::new(|| env_or("DAILY_LIMIT", 50));

    /// Simultaneous downloads per regular user
    pub static CONCURRENT_LIMIT: Lazy<usize> = Lazy::new(|| env_or("CONCURRENT_LIMIT", 5));

    /// Downloads allowed per rolling day for VIP users
    pub static VIP_DAILY_LIMIT: Lazy<usize> = Lazy::new(|| env_or("VIP_DAILY_LIMIT", 200));

    /// Simultaneous downloads per VIP user
    pub static VIP_CONCURRENT_LIMIT: Lazy<usize> = Lazy::new(|| env_or("VIP_CONCURRENT_LIMIT", 10));

    /// Simultaneous downloads across all users
    pub static GLOBAL_CONCURRENT_LIMIT: Lazy<usize> = Lazy::new(|| env_or("GLOBAL_CONCURRENT_LIMIT", 50));

    /// Largest file the bot will try to deliver, in bytes
    /// Read from MAX_FILE_SIZE; defaults to the Bot API ceiling for the configured server
    pub static MAX_FILE_SIZE: Lazy<u64> = Lazy::new(|| {
        let default = if super::BOT_API_URL.is_some() {
            LOCAL_SERVER_FILE_LIMIT
        } else {
            STANDARD_FILE_LIMIT
        };
        env_or("MAX_FILE_SIZE", default)
    });

    pub fn daily_window() -> Duration {
        Duration::from_secs(DAILY_WINDOW_SECS)
    }
}

/// Maintenance mode configuration
pub mod maintenance {
    use super::{env_flag, Lazy};
    use std::env;

    /// Read from MAINTENANCE_MODE environment variable
    pub static ENABLED: Lazy<bool> = Lazy::new(|| env_flag("MAINTENANCE_MODE"));

    /// Optional custom text shown to users while maintenance is on
    pub static MESSAGE: Lazy<Option<String>> = Lazy::new(|| {
        env::var("MAINTENANCE_MESSAGE")
            .ok()
            .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
    });
}

/// Cookie storage configuration
pub mod cookies {
    use super::Lazy;
    use std::env;

    /// Largest accepted cookie upload (1 MiB)
    pub const MAX_UPLOAD_BYTES: u32 = 1024 * 1024;

    /// Base64-encoded 32-byte key for cookie encryption
    /// Read from ENCRYPTION_KEY environment variable
    pub static ENCRYPTION_KEY: Lazy<Option<String>> = Lazy::new(|| {
        env::var("ENCRYPTION_KEY")
            .ok()
            .and_then(|s| if s.trim().is_empty() { None } else { Some(s) })
    });
}

/// Progress message configuration
pub mod progress {
    use super::Duration;

    /// Minimum spacing between status edits (in milliseconds)
    pub const UPDATE_INTERVAL_MS: u64 = 2000;

    /// Number of cells in the textual progress bar
    pub const BAR_WIDTH: usize = 20;

    pub fn update_interval() -> Duration {
        Duration::from_millis(UPDATE_INTERVAL_MS)
    }
}

/// In-memory cache configuration
pub mod cache {
    use super::Duration;

    /// Lifetime of cached metadata lookups (in seconds)
    pub const TTL_SECS: u64 = 300;

    pub fn ttl() -> Duration {
        Duration::from_secs(TTL_SECS)
    }
}

/// Download engine configuration
pub mod download {
    use super::Duration;

    /// Timeout for metadata extraction (in seconds)
    pub const EXTRACT_TIMEOUT_SECS: u64 = 30;

    /// Timeout for a whole download (in seconds)
    pub const DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

    /// Network retries passed to the engine
    pub const RETRIES: u32 = 3;

    /// Socket timeout passed to the engine (in seconds)
    pub const SOCKET_TIMEOUT_SECS: u64 = 30;

    /// Fragments fetched in parallel for segmented formats
    pub const CONCURRENT_FRAGMENTS: u32 = 4;

    /// Container used when video and audio are merged
    pub const MERGE_OUTPUT_FORMAT: &str = "mp4";

    /// How long a task waits for a quality pick before it is dropped (in seconds)
    pub const PENDING_TTL_SECS: u64 = 3600;

    pub fn extract_timeout() -> Duration {
        Duration::from_secs(EXTRACT_TIMEOUT_SECS)
    }

    pub fn download_timeout() -> Duration {
        Duration::from_secs(DOWNLOAD_TIMEOUT_SECS)
    }

    pub fn socket_timeout() -> Duration {
        Duration::from_secs(SOCKET_TIMEOUT_SECS)
    }

    pub fn pending_ttl() -> Duration {
        Duration::from_secs(PENDING_TTL_SECS)
    }
}

/// Temporary file cleanup configuration
pub mod cleanup {
    use super::Duration;

    /// Interval between cleanup sweeps (in seconds)
    pub const INTERVAL_SECS: u64 = 3600;

    /// Files older than this are removed by the periodic sweep (in hours)
    pub const MAX_AGE_HOURS: u64 = 24;

    /// Age used by the manual /cleanup command (in hours)
    pub const MANUAL_MAX_AGE_HOURS: u64 = 1;

    pub fn interval() -> Duration {
        Duration::from_secs(INTERVAL_SECS)
    }

    pub fn max_age() -> Duration {
        Duration::from_secs(MAX_AGE_HOURS * 3600)
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for HTTP requests (in seconds)
    /// Long enough for large file uploads through a local Bot API server
    pub const REQUEST_TIMEOUT_SECS: u64 = 900;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn admin_ids_accept_mixed_separators() {
        assert_eq!(admin::parse_admin_ids("1, 2\n3\t4"), vec![1, 2, 3, 4]);
        assert_eq!(admin::parse_admin_ids("abc,,5"), vec![5]);
        assert!(admin::parse_admin_ids("").is_empty());
    }

    #[test]
    fn flags_are_parsed_case_insensitively() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" yes "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }

    #[test]
    #[serial]
    fn numeric_env_values_fall_back_to_default() {
        std::env::set_var("VIDGRAB_TEST_LIMIT", " 12 ");
        assert_eq!(env_or("VIDGRAB_TEST_LIMIT", 3usize), 12);
        std::env::set_var("VIDGRAB_TEST_LIMIT", "many");
        assert_eq!(env_or("VIDGRAB_TEST_LIMIT", 3usize), 3);
        std::env::remove_var("VIDGRAB_TEST_LIMIT");
        assert_eq!(env_or("VIDGRAB_TEST_LIMIT", 3usize), 3);
    }

    #[test]
    #[serial]
    fn flags_read_from_env() {
        std::env::set_var("VIDGRAB_TEST_FLAG", "On");
        assert!(env_flag("VIDGRAB_TEST_FLAG"));
        std::env::remove_var("VIDGRAB_TEST_FLAG");
        assert!(!env_flag("VIDGRAB_TEST_FLAG"));
    }

    #[test]
    fn durations_match_constants() {
        assert_eq!(progress::update_interval(), Duration::from_secs(2));
        assert_eq!(cache::ttl(), Duration::from_secs(300));
        assert_eq!(limits::daily_window(), Duration::from_secs(86_400));
    }
}
