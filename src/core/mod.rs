//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod rate_limiter;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::*;
pub use error::{AppError, AppResult};
pub use logging::{init_logger, log_startup_configuration};
pub use rate_limiter::{RateDecision, RateWindow};
pub use utils::{escape_html, extract_retry_after, format_file_size};
pub use validation::{detect_platform, Platform};
