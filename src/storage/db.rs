use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Result, Row};

use crate::core::error::{AppError, AppResult};
use crate::storage::migrations;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// SQLite's `CURRENT_TIMESTAMP` layout.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats a timestamp the way the schema stores it.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses a stored timestamp; accepts RFC 3339 as well.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map(|n| n.and_utc())
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)))
}

/// A user row.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    /// Telegram user ID
    pub user_id: i64,
    /// Telegram @username, if any
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Interface language code ("en", "ru")
    pub language: String,
    /// Quality preselected by /quality ("1080", "best", "audio", ...)
    pub default_quality: String,
    pub is_vip: bool,
    /// VIP end; `None` with `is_vip` means no expiry
    pub vip_expiry: Option<DateTime<Utc>>,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub total_downloads: i64,
    pub successful_downloads: i64,
    pub failed_downloads: i64,
    /// Bytes delivered in total
    pub total_size: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
    /// Downloads since the last daily reset
    pub daily_downloads: i64,
    pub daily_reset: Option<DateTime<Utc>>,
}

impl User {
    /// VIP flag set and not yet expired.
    pub fn is_vip_active(&self, now: DateTime<Utc>) -> bool {
        self.is_vip && self.vip_expiry.map_or(true, |expiry| expiry > now)
    }

    /// Name for greetings: first name, then username, then the ID.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.username.clone())
            .unwrap_or_else(|| self.user_id.to_string())
    }
}

const USER_COLUMNS: &str = "user_id, username, first_name, last_name, language, default_quality, is_vip, vip_expiry,
    is_banned, ban_reason, total_downloads, successful_downloads, failed_downloads, total_size, created_at,
    last_active, daily_downloads, daily_reset";

fn user_from_row(row: &Row<'_>) -> Result<User> {
    let ts = |idx: usize| -> Result<Option<DateTime<Utc>>> {
        Ok(row.get::<_, Option<String>>(idx)?.as_deref().and_then(parse_timestamp))
    };
    Ok(User {
        user_id: row.get(0)?,
        username: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        language: row.get(4)?,
        default_quality: row.get(5)?,
        is_vip: row.get::<_, i64>(6)? != 0,
        vip_expiry: ts(7)?,
        is_banned: row.get::<_, i64>(8)? != 0,
        ban_reason: row.get(9)?,
        total_downloads: row.get(10)?,
        successful_downloads: row.get(11)?,
        failed_downloads: row.get(12)?,
        total_size: row.get(13)?,
        created_at: ts(14)?,
        last_active: ts(15)?,
        daily_downloads: row.get(16)?,
        daily_reset: ts(17)?,
    })
}

/// Opens a pool on `database_path` and brings the schema up to date.
///
/// # Example
///
/// ```no_run
/// use vidgrab::storage::db;
///
/// let pool = db::create_pool("vidgrab.sqlite")?;
/// let conn = db::get_connection(&pool)?;
/// # Ok::<(), vidgrab::core::error::AppError>(())
/// ```
pub fn create_pool(database_path: &str) -> AppResult<DbPool> {
    let manager = SqliteConnectionManager::file(database_path)
        .with_init(|conn| conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;"));
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn).map_err(|e| AppError::Config(format!("database migration failed: {:#}", e)))?;

    Ok(pool)
}

/// Gets a connection from the pool; it returns to the pool on drop.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

/// Loads a user by Telegram ID.
pub fn get_user(conn: &DbConnection, user_id: i64) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE user_id = ?1", USER_COLUMNS),
        params![user_id],
        user_from_row,
    )
    .optional()
}

/// Creates the user or refreshes their profile fields and `last_active`.
///
/// `language` is only used for new users; an explicit choice is kept.
pub fn upsert_user(
    conn: &DbConnection,
    user_id: i64,
    username: Option<&str>,
    first_name: Option<&str>,
    last_name: Option<&str>,
    language: &str,
    default_quality: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO users (user_id, username, first_name, last_name, language, default_quality)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(user_id) DO UPDATE SET
            username = excluded.username,
            first_name = excluded.first_name,
            last_name = excluded.last_name,
            last_active = CURRENT_TIMESTAMP",
        params![user_id, username, first_name, last_name, language, default_quality],
    )?;
    Ok(())
}

/// Makes sure a row exists so admin actions work on users who never wrote.
fn ensure_user_row(conn: &DbConnection, user_id: i64) -> Result<()> {
    conn.execute("INSERT OR IGNORE INTO users (user_id) VALUES (?1)", params![user_id])?;
    Ok(())
}

pub fn set_language(conn: &DbConnection, user_id: i64, language: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET language = ?1, last_active = CURRENT_TIMESTAMP WHERE user_id = ?2",
        params![language, user_id],
    )?;
    Ok(())
}

pub fn set_default_quality(conn: &DbConnection, user_id: i64, quality: &str) -> Result<()> {
    conn.execute(
        "UPDATE users SET default_quality = ?1, last_active = CURRENT_TIMESTAMP WHERE user_id = ?2",
        params![quality, user_id],
    )?;
    Ok(())
}

/// Bans (`Some(reason)`) or unbans (`None`) a user.
pub fn set_ban(conn: &DbConnection, user_id: i64, reason: Option<&str>) -> Result<()> {
    ensure_user_row(conn, user_id)?;
    conn.execute(
        "UPDATE users SET is_banned = ?1, ban_reason = ?2 WHERE user_id = ?3",
        params![reason.is_some(), reason, user_id],
    )?;
    log::info!(
        "User {} {}",
        user_id,
        if reason.is_some() { "banned" } else { "unbanned" }
    );
    Ok(())
}

/// Grants VIP until `expiry`, or revokes it when `expiry` is `None`.
pub fn set_vip(conn: &DbConnection, user_id: i64, expiry: Option<DateTime<Utc>>) -> Result<()> {
    ensure_user_row(conn, user_id)?;
    conn.execute(
        "UPDATE users SET is_vip = ?1, vip_expiry = ?2 WHERE user_id = ?3",
        params![expiry.is_some(), expiry.map(format_timestamp), user_id],
    )?;
    Ok(())
}

/// Drops VIP status whose expiry has passed; returns the number of users affected.
pub fn expire_vips(conn: &DbConnection) -> Result<usize> {
    let count = conn.execute(
        "UPDATE users SET is_vip = 0
         WHERE is_vip = 1 AND vip_expiry IS NOT NULL AND vip_expiry < ?1",
        params![format_timestamp(Utc::now())],
    )?;
    if count > 0 {
        log::info!("Expired VIP status of {} user(s)", count);
    }
    Ok(count)
}

/// Counts one finished download against the user's totals and daily counter.
pub fn increment_download_count(conn: &DbConnection, user_id: i64, success: bool, size: u64) -> Result<()> {
    if success {
        conn.execute(
            "UPDATE users SET
                total_downloads = total_downloads + 1,
                successful_downloads = successful_downloads + 1,
                total_size = total_size + ?1,
                daily_downloads = daily_downloads + 1,
                last_active = CURRENT_TIMESTAMP
             WHERE user_id = ?2",
            params![size as i64, user_id],
        )?;
    } else {
        conn.execute(
            "UPDATE users SET
                total_downloads = total_downloads + 1,
                failed_downloads = failed_downloads + 1,
                daily_downloads = daily_downloads + 1,
                last_active = CURRENT_TIMESTAMP
             WHERE user_id = ?1",
            params![user_id],
        )?;
    }
    Ok(())
}

/// Zeroes every daily counter; returns the number of users touched.
pub fn reset_daily_counters(conn: &DbConnection) -> Result<usize> {
    conn.execute(
        "UPDATE users SET daily_downloads = 0, daily_reset = CURRENT_TIMESTAMP WHERE daily_downloads != 0",
        [],
    )
}

/// Terminal status of a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Completed,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Data for a new history row.
#[derive(Debug, Clone)]
pub struct NewDownload<'a> {
    pub user_id: i64,
    pub url: &'a str,
    pub title: &'a str,
    pub platform: &'a str,
    pub quality: &'a str,
    pub file_size: u64,
    /// Seconds
    pub duration: u64,
    pub status: HistoryStatus,
    pub error_message: Option<&'a str>,
}

pub fn add_download_history(conn: &DbConnection, entry: &NewDownload<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO downloads
            (user_id, url, title, platform, quality, file_size, duration, status, error_message, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, CURRENT_TIMESTAMP)",
        params![
            entry.user_id,
            entry.url,
            entry.title,
            entry.platform,
            entry.quality,
            entry.file_size as i64,
            entry.duration as i64,
            entry.status.as_str(),
            entry.error_message,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A stored history row.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRecord {
    pub id: i64,
    pub user_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub platform: Option<String>,
    pub quality: Option<String>,
    pub file_size: i64,
    pub duration: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Newest-first page of a user's history.
pub fn get_download_history(conn: &DbConnection, user_id: i64, limit: u32, offset: u32) -> Result<Vec<DownloadRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, user_id, url, title, platform, quality, file_size, duration, status, error_message,
                created_at, completed_at
         FROM downloads WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2 OFFSET ?3",
    )?;
    let rows = stmt.query_map(params![user_id, limit, offset], |row| {
        Ok(DownloadRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            url: row.get(2)?,
            title: row.get(3)?,
            platform: row.get(4)?,
            quality: row.get(5)?,
            file_size: row.get(6)?,
            duration: row.get(7)?,
            status: row.get(8)?,
            error_message: row.get(9)?,
            created_at: row.get(10)?,
            completed_at: row.get(11)?,
        })
    })?;
    rows.collect()
}

/// User totals for /stats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserCounts {
    pub total: i64,
    /// Active in the last 24 hours
    pub active: i64,
    pub vip: i64,
    pub banned: i64,
}

pub fn get_user_counts(conn: &DbConnection) -> Result<UserCounts> {
    let day_ago = format_timestamp(Utc::now() - ChronoDuration::hours(24));
    conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN last_active >= ?1 THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(is_vip), 0),
            COALESCE(SUM(is_banned), 0)
         FROM users",
        params![day_ago],
        |row| {
            Ok(UserCounts {
                total: row.get(0)?,
                active: row.get(1)?,
                vip: row.get(2)?,
                banned: row.get(3)?,
            })
        },
    )
}

/// Per-day totals stored in `statistics`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStatistics {
    pub date: NaiveDate,
    pub total_downloads: i64,
    pub successful_downloads: i64,
    pub failed_downloads: i64,
    pub unique_users: i64,
    pub total_size: i64,
    pub top_platform: Option<String>,
}

/// Aggregates the history rows of `date` into the `statistics` table.
///
/// Re-running for the same date overwrites the earlier snapshot.
pub fn record_daily_statistics(conn: &DbConnection, date: NaiveDate) -> Result<DailyStatistics> {
    let day = date.format("%Y-%m-%d").to_string();

    let (total, successful, failed, unique_users, total_size) = conn.query_row(
        "SELECT
            COUNT(*),
            COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
            COUNT(DISTINCT user_id),
            COALESCE(SUM(CASE WHEN status = 'completed' THEN file_size ELSE 0 END), 0)
         FROM downloads WHERE DATE(created_at) = ?1",
        params![day],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        },
    )?;

    let top_platform: Option<String> = conn
        .query_row(
            "SELECT platform FROM downloads
             WHERE DATE(created_at) = ?1 AND platform IS NOT NULL
             GROUP BY platform ORDER BY COUNT(*) DESC, platform ASC LIMIT 1",
            params![day],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO statistics
            (date, total_downloads, successful_downloads, failed_downloads, unique_users, total_size, top_platform)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(date) DO UPDATE SET
            total_downloads = excluded.total_downloads,
            successful_downloads = excluded.successful_downloads,
            failed_downloads = excluded.failed_downloads,
            unique_users = excluded.unique_users,
            total_size = excluded.total_size,
            top_platform = excluded.top_platform",
        params![day, total, successful, failed, unique_users, total_size, top_platform],
    )?;

    Ok(DailyStatistics {
        date,
        total_downloads: total,
        successful_downloads: successful,
        failed_downloads: failed,
        unique_users,
        total_size,
        top_platform,
    })
}
