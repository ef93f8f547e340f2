//! Classification of engine failures
//!
//! The engine reports failures as free text on stderr. The text is matched
//! against known phrases to pick a category for the user-facing message. The
//! match is a heuristic: anything unrecognized becomes [`FailureKind::Unknown`].

use std::fmt;

/// Failure categories shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The video is private
    Private,
    /// The site wants a logged-in account
    LoginRequired,
    /// Age-gated content
    AgeRestricted,
    /// Not available in the server's country
    GeoRestricted,
    /// Larger than the configured delivery limit
    FileTooLarge,
    /// Connection problems
    Network,
    /// The call exceeded its deadline
    Timeout,
    /// Anything else
    Unknown,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::LoginRequired => "login_required",
            Self::AgeRestricted => "age_restricted",
            Self::GeoRestricted => "geo_restricted",
            Self::FileTooLarge => "file_too_large",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Translation key of the user-facing message.
    pub fn message_key(&self) -> &'static str {
        match self {
            Self::Private => "errors-private-video",
            Self::LoginRequired => "errors-login-required",
            Self::AgeRestricted => "errors-age-restricted",
            Self::GeoRestricted => "errors-geo-restricted",
            Self::FileTooLarge => "errors-file-too-large",
            Self::Network => "errors-network",
            Self::Timeout => "errors-timeout",
            Self::Unknown => "errors-download-failed",
        }
    }

    /// Failures worth a warning in the logs rather than an info line.
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::Unknown)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PRIVATE_MARKERS: &[&str] = &[
    "private video",
    "video is private",
    "this video is private",
    "this account is private",
];

const AGE_MARKERS: &[&str] = &[
    "age-restricted",
    "age restricted",
    "confirm your age",
    "inappropriate for some users",
    "age verification",
];

const LOGIN_MARKERS: &[&str] = &[
    "sign in",
    "login required",
    "log in to",
    "requires authentication",
    "use --cookies",
    "cookies are no longer valid",
    "members-only",
];

const GEO_MARKERS: &[&str] = &[
    "geo restrict",
    "geo-restrict",
    "available in your country",
    "available in your region",
    "blocked it in your country",
    "from your location",
];

const SIZE_MARKERS: &[&str] = &["larger than max-filesize", "file is larger than", "file too large"];

const TIMEOUT_MARKERS: &[&str] = &["timed out", "timeout"];

const NETWORK_MARKERS: &[&str] = &[
    "connection",
    "network",
    "socket",
    "dns",
    "failed to connect",
    "temporary failure in name resolution",
    "unable to download webpage",
    "http error 5",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Maps raw engine error text onto a [`FailureKind`].
///
/// # Examples
/// ```
/// use vidgrab::download::ytdlp_errors::{classify_error, FailureKind};
///
/// assert_eq!(classify_error("ERROR: [youtube] abc: Private video"), FailureKind::Private);
/// assert_eq!(classify_error("something odd happened"), FailureKind::Unknown);
/// ```
pub fn classify_error(stderr: &str) -> FailureKind {
    let lower = stderr.to_lowercase();

    // Age gates are phrased as "sign in to confirm your age", so they go before login
    if contains_any(&lower, PRIVATE_MARKERS) {
        FailureKind::Private
    } else if contains_any(&lower, AGE_MARKERS) {
        FailureKind::AgeRestricted
    } else if contains_any(&lower, LOGIN_MARKERS) {
        FailureKind::LoginRequired
    } else if contains_any(&lower, GEO_MARKERS) {
        FailureKind::GeoRestricted
    } else if contains_any(&lower, SIZE_MARKERS) {
        FailureKind::FileTooLarge
    } else if contains_any(&lower, TIMEOUT_MARKERS) {
        FailureKind::Timeout
    } else if contains_any(&lower, NETWORK_MARKERS) {
        FailureKind::Network
    } else {
        FailureKind::Unknown
    }
}

/// Picks the most informative line of engine stderr for logs and history.
pub fn summarize_error(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
        .map(|l| l.trim().chars().take(300).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_video() {
        assert_eq!(
            classify_error("ERROR: [youtube] dQw4w9WgXcQ: Private video. Sign in if you've been granted access"),
            FailureKind::Private
        );
    }

    #[test]
    fn test_age_restricted_before_login() {
        assert_eq!(
            classify_error("ERROR: Sign in to confirm your age. This video may be inappropriate for some users."),
            FailureKind::AgeRestricted
        );
    }

    #[test]
    fn test_login_required() {
        assert_eq!(
            classify_error("ERROR: [instagram] xyz: Requested content is not available, login required"),
            FailureKind::LoginRequired
        );
        assert_eq!(
            classify_error("Sign in to confirm you're not a bot. Use --cookies-from-browser"),
            FailureKind::LoginRequired
        );
    }

    #[test]
    fn test_geo_restricted() {
        assert_eq!(
            classify_error("ERROR: The uploader has not made this video available in your country"),
            FailureKind::GeoRestricted
        );
        assert_eq!(
            classify_error("ERROR: This video is not available in your country"),
            FailureKind::GeoRestricted
        );
        assert_eq!(
            classify_error("Video geo-restricted by the uploader"),
            FailureKind::GeoRestricted
        );
    }

    #[test]
    fn test_network_and_timeout() {
        assert_eq!(classify_error("Read timed out."), FailureKind::Timeout);
        assert_eq!(
            classify_error("ERROR: Unable to download webpage: <urlopen error [Errno -2]>"),
            FailureKind::Network
        );
        assert_eq!(classify_error("HTTP Error 503: Service Unavailable"), FailureKind::Network);
    }

    #[test]
    fn test_file_too_large() {
        assert_eq!(
            classify_error("[download] File is larger than max-filesize (60000000 bytes > 52428800 bytes). Aborting."),
            FailureKind::FileTooLarge
        );
    }

    #[test]
    fn test_unknown_fallback() {
        assert_eq!(classify_error(""), FailureKind::Unknown);
        assert_eq!(classify_error("ERROR: Unsupported URL: https://example.com"), FailureKind::Unknown);
    }

    #[test]
    fn test_summarize_prefers_error_lines() {
        let stderr = "[youtube] Extracting URL\nERROR: Private video\nWARNING: trailing";
        assert_eq!(summarize_error(stderr), "ERROR: Private video");
        assert_eq!(summarize_error("only line\n\n"), "only line");
        assert_eq!(summarize_error(""), "");
    }

    #[test]
    fn test_message_keys_are_distinct() {
        let kinds = [
            FailureKind::Private,
            FailureKind::LoginRequired,
            FailureKind::AgeRestricted,
            FailureKind::GeoRestricted,
            FailureKind::FileTooLarge,
            FailureKind::Network,
            FailureKind::Timeout,
            FailureKind::Unknown,
        ];
        let keys: std::collections::HashSet<_> = kinds.iter().map(|k| k.message_key()).collect();
        assert_eq!(keys.len(), kinds.len());
    }
}
