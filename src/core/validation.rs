//! URL validation and platform detection
//!
//! Incoming messages are checked here before any task is created:
//! - the first `http(s)://` link is extracted from free text
//! - the link must look like a real URL (host, localhost or IPv4)
//! - the source platform is detected from per-platform patterns

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The message contains no link at all
    #[error("No URL found in message")]
    NoUrl,

    /// The link is malformed or uses an unsupported scheme
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Platforms with dedicated URL patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Youtube,
    Instagram,
    Twitter,
    Tiktok,
    Facebook,
    Vimeo,
    Dailymotion,
    Twitch,
    Reddit,
    Aparat,
    Namasha,
    Vk,
    Bilibili,
    /// A plain link to a video file
    Direct,
    /// Anything else; still handed to the engine's generic extractor
    Unknown,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Instagram => "instagram",
            Self::Twitter => "twitter",
            Self::Tiktok => "tiktok",
            Self::Facebook => "facebook",
            Self::Vimeo => "vimeo",
            Self::Dailymotion => "dailymotion",
            Self::Twitch => "twitch",
            Self::Reddit => "reddit",
            Self::Aparat => "aparat",
            Self::Namasha => "namasha",
            Self::Vk => "vk",
            Self::Bilibili => "bilibili",
            Self::Direct => "direct",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable name shown in status messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Youtube => "YouTube",
            Self::Instagram => "Instagram",
            Self::Twitter => "X (Twitter)",
            Self::Tiktok => "TikTok",
            Self::Facebook => "Facebook",
            Self::Vimeo => "Vimeo",
            Self::Dailymotion => "Dailymotion",
            Self::Twitch => "Twitch",
            Self::Reddit => "Reddit",
            Self::Aparat => "Aparat",
            Self::Namasha => "Namasha",
            Self::Vk => "VK",
            Self::Bilibili => "Bilibili",
            Self::Direct => "Direct link",
            Self::Unknown => "Web",
        }
    }

    pub fn parse(s: &str) -> Self {
        ALL_PLATFORMS
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .unwrap_or(Self::Unknown)
    }

    /// Every platform, in detection order.
    pub fn all() -> &'static [Platform] {
        &ALL_PLATFORMS
    }

    /// Cookie domains that identify this platform inside an uploaded cookie file.
    pub fn cookie_domains(&self) -> &'static [&'static str] {
        match self {
            Self::Youtube => &["youtube.com", "google.com"],
            Self::Instagram => &["instagram.com"],
            Self::Twitter => &["twitter.com", "x.com"],
            Self::Tiktok => &["tiktok.com"],
            Self::Facebook => &["facebook.com"],
            Self::Vimeo => &["vimeo.com"],
            Self::Dailymotion => &["dailymotion.com"],
            Self::Twitch => &["twitch.tv"],
            Self::Reddit => &["reddit.com"],
            Self::Aparat => &["aparat.com"],
            Self::Namasha => &["namasha.com"],
            Self::Vk => &["vk.com"],
            Self::Bilibili => &["bilibili.com"],
            Self::Direct | Self::Unknown => &[],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL_PLATFORMS: [Platform; 15] = [
    Platform::Youtube,
    Platform::Instagram,
    Platform::Twitter,
    Platform::Tiktok,
    Platform::Facebook,
    Platform::Vimeo,
    Platform::Dailymotion,
    Platform::Twitch,
    Platform::Reddit,
    Platform::Aparat,
    Platform::Namasha,
    Platform::Vk,
    Platform::Bilibili,
    Platform::Direct,
    Platform::Unknown,
];

static URL_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^\s<>"{}|\\^`\[\]]+"#).expect("Failed to compile URL regex"));

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)^https?://",
        r"(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,63}\.?|",
        r"localhost|",
        r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
        r"(?::\d+)?",
        r"(?:/?|[/?]\S+)$"
    ))
    .expect("Failed to compile URL validation regex")
});

static PLATFORM_PATTERNS: Lazy<Vec<(Platform, Vec<Regex>)>> = Lazy::new(|| {
    let table: [(Platform, &[&str]); 13] = [
        (
            Platform::Youtube,
            &[
                r"youtube\.com/watch\?v=[\w-]+",
                r"youtu\.be/[\w-]+",
                r"youtube\.com/shorts/[\w-]+",
                r"youtube\.com/live/[\w-]+",
                r"youtube\.com/playlist\?list=[\w-]+",
            ],
        ),
        (
            Platform::Instagram,
            &[r"instagram\.com/(?:p|reel|tv)/[\w-]+", r"instagram\.com/stories/[\w.]+/\d+"],
        ),
        (
            Platform::Twitter,
            &[r"(?:twitter|x)\.com/\w+/status/\d+", r"(?:twitter|x)\.com/i/status/\d+"],
        ),
        (
            Platform::Tiktok,
            &[r"tiktok\.com/@[\w.]+/video/\d+", r"(?:vm|vt)\.tiktok\.com/\w+", r"tiktok\.com/t/\w+"],
        ),
        (
            Platform::Facebook,
            &[r"facebook\.com/.+/videos/\d+", r"fb\.watch/\w+", r"facebook\.com/watch/?\?v=\d+"],
        ),
        (Platform::Vimeo, &[r"vimeo\.com/\d+", r"player\.vimeo\.com/video/\d+"]),
        (Platform::Dailymotion, &[r"dailymotion\.com/video/\w+", r"dai\.ly/\w+"]),
        (
            Platform::Twitch,
            &[r"twitch\.tv/videos/\d+", r"twitch\.tv/\w+/clip/[\w-]+", r"clips\.twitch\.tv/[\w-]+"],
        ),
        (
            Platform::Reddit,
            &[r"reddit\.com/r/\w+/comments/\w+", r"redd\.it/\w+", r"v\.redd\.it/\w+"],
        ),
        (Platform::Aparat, &[r"aparat\.com/v/\w+"]),
        (Platform::Namasha, &[r"namasha\.com/v/\w+"]),
        (Platform::Vk, &[r"vk\.com/video-?\d+_\d+", r"vk\.com/clip-?\d+_\d+"]),
        (Platform::Bilibili, &[r"bilibili\.com/video/\w+", r"b23\.tv/\w+"]),
    ];

    table
        .iter()
        .map(|(platform, patterns)| {
            let compiled = patterns
                .iter()
                .map(|p| {
                    // Optional scheme and subdomain prefix, anchored at the start
                    Regex::new(&format!(r"(?i)^(?:https?://)?(?:[\w-]+\.)?{}", p))
                        .expect("Failed to compile platform regex")
                })
                .collect();
            (*platform, compiled)
        })
        .collect()
});

static DIRECT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://\S+\.(?:mp4|mkv|webm|avi|mov|flv|wmv|m4v|3gp)(?:\?\S*)?$")
        .expect("Failed to compile direct link regex")
});

/// Returns the first `http(s)` link found in free text.
///
/// # Examples
/// ```
/// use vidgrab::core::validation::extract_url;
///
/// assert_eq!(
///     extract_url("look: https://youtu.be/abc123 !"),
///     Some("https://youtu.be/abc123")
/// );
/// assert_eq!(extract_url("no links here"), None);
/// ```
pub fn extract_url(text: &str) -> Option<&str> {
    URL_IN_TEXT.find(text).map(|m| m.as_str())
}

/// Checks that a string is a syntactically valid `http(s)` URL.
pub fn is_valid_url(url: &str) -> bool {
    URL_PATTERN.is_match(url) && url::Url::parse(url).is_ok()
}

/// Extracts and validates the link contained in a message.
pub fn validate_message_url(text: &str) -> Result<String, ValidationError> {
    let url = extract_url(text).ok_or(ValidationError::NoUrl)?;
    if is_valid_url(url) {
        Ok(url.to_string())
    } else {
        Err(ValidationError::InvalidUrl(url.to_string()))
    }
}

/// Detects the platform a URL belongs to.
pub fn detect_platform(url: &str) -> Platform {
    let url = url.trim();

    for (platform, patterns) in PLATFORM_PATTERNS.iter() {
        if patterns.iter().any(|re| re.is_match(url)) {
            return *platform;
        }
    }

    if DIRECT_LINK.is_match(url) {
        return Platform::Direct;
    }

    Platform::Unknown
}
