//! Quality presets and their engine format selectors.

use std::fmt;

use crate::core::config;

/// Video heights offered as presets, highest first.
pub const PRESET_HEIGHTS: [u32; 7] = [2160, 1440, 1080, 720, 480, 360, 240];

/// Tallest frame accepted from a format list.
const MAX_HEIGHT: u32 = 4320;

/// Extensions delivered as audio rather than video.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "aac", "ogg", "opus", "flac", "wav"];

/// A user-selectable quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quality {
    /// Height-capped video (e.g. 720 means "at most 720p")
    Height(u32),
    Best,
    Audio,
}

impl Quality {
    /// Parses a stored or callback quality value.
    ///
    /// `auto` resolves to the configured default quality. Heights must be one
    /// of the presets.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "best" => Some(Self::Best),
            "audio" | "mp3" => Some(Self::Audio),
            "auto" | "" => match config::DEFAULT_QUALITY.trim().to_lowercase().as_str() {
                "auto" | "" => Some(Self::Height(1080)),
                default => Self::parse(default).or(Some(Self::Height(1080))),
            },
            other => {
                let height: u32 = other.trim_end_matches('p').parse().ok()?;
                PRESET_HEIGHTS.contains(&height).then_some(Self::Height(height))
            }
        }
    }

    /// Like [`Quality::parse`], but accepts any height up to 8K.
    ///
    /// Used for picks from a video's own format list, which need not match a preset.
    pub fn parse_any_height(s: &str) -> Option<Self> {
        Self::parse(s).or_else(|| {
            let height: u32 = s.trim().trim_end_matches('p').parse().ok()?;
            (1..=MAX_HEIGHT).contains(&height).then_some(Self::Height(height))
        })
    }

    /// Like [`Quality::parse`] but falls back to 1080p.
    pub fn parse_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::Height(1080))
    }

    /// Value stored in the database and callback data.
    pub fn as_str(&self) -> String {
        match self {
            Self::Height(h) => h.to_string(),
            Self::Best => "best".to_string(),
            Self::Audio => "audio".to_string(),
        }
    }

    /// Short label shown in progress messages (`720p`, `best`, `audio`).
    pub fn label(&self) -> String {
        match self {
            Self::Height(h) => format!("{}p", h),
            Self::Best => "best".to_string(),
            Self::Audio => "audio".to_string(),
        }
    }

    /// Engine format selection expression.
    pub fn selector(&self) -> String {
        match self {
            Self::Height(h) => format!(
                "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<={h}]+bestaudio/best[height<={h}]"
            ),
            Self::Best => "bestvideo+bestaudio/best".to_string(),
            Self::Audio => "bestaudio[ext=m4a]/bestaudio/best".to_string(),
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Colour marker used on quality buttons.
pub fn height_emoji(height: u32) -> &'static str {
    match height {
        2160 => "🔵",
        1440 => "🟣",
        1080 => "🟢",
        720 => "🟡",
        480 => "🟠",
        360 => "🔴",
        240 => "⚫️",
        _ => "⚪️",
    }
}

/// Whether a file with this extension is sent as audio.
pub fn is_audio_extension(ext: &str) -> bool {
    AUDIO_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext))
}
