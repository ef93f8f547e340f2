use thiserror::Error;

/// Centralized error types for the application
///
/// All fallible operations outside the download boundary return this enum.
/// Download failures are classified separately (see
/// [`FailureKind`](crate::download::ytdlp_errors::FailureKind)) and never
/// travel through handler logic as raw errors.
///
/// # Example
///
/// ```no_run
/// use vidgrab::core::error::AppError;
///
/// fn handle_error(err: AppError) {
///     log::error!("Error: {}", err);
/// }
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Telegram API errors
    #[error("Telegram error: {0}")]
    Telegram(#[from] teloxide::RequestError),

    /// Download/yt-dlp errors
    #[error("Download error: {0}")]
    Download(String),

    /// HTTP errors from direct-link downloads
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// Malformed engine output or cookie JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cookie encryption/decryption failures
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A task with the same ID is already registered
    #[error("Task {0} is already registered")]
    DuplicateTask(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Helper function to convert String to AppError::Download
impl From<String> for AppError {
    fn from(err: String) -> Self {
        AppError::Download(err)
    }
}

/// Helper function to convert &str to AppError::Download
impl From<&str> for AppError {
    fn from(err: &str) -> Self {
        AppError::Download(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_converts_to_download_error() {
        let err: AppError = "engine exited with status 1".into();
        assert!(matches!(err, AppError::Download(_)));
        assert_eq!(err.to_string(), "Download error: engine exited with status 1");
    }

    #[test]
    fn duplicate_task_names_the_id() {
        let err = AppError::DuplicateTask("abc".to_string());
        assert_eq!(err.to_string(), "Task abc is already registered");
    }
}
