//! Inline keyboards and callback data.
//!
//! Callback data stays under Telegram's 64-byte limit: task IDs are 32 hex
//! characters and every prefix is at most 11 bytes.

use unic_langid::LanguageIdentifier;

use crate::download::engine::VideoInfo;
use crate::download::formats::{height_emoji, Quality, PRESET_HEIGHTS};
use crate::i18n::{self, SUPPORTED_LANGS};
use crate::telegram::sink::{Keyboard, KeyboardButton};

/// At most this many resolutions are offered for one video.
pub const MAX_QUALITY_BUTTONS: usize = 6;
const BUTTONS_PER_ROW: usize = 3;

/// Parsed callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// `dl:<task>:<quality>`
    Download { task_id: String, quality: Quality },
    /// `cancel:<task>`
    Cancel { task_id: String },
    /// `lang:<code>`
    Language(String),
    /// `setquality:<quality>`
    SetQuality(Quality),
    /// `delcookie:<platform>`
    DeleteCookie(String),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (prefix, rest) = data.split_once(':')?;
        match prefix {
            "dl" => {
                let (task_id, quality) = rest.rsplit_once(':')?;
                if task_id.is_empty() {
                    return None;
                }
                Some(Self::Download {
                    task_id: task_id.to_string(),
                    quality: Quality::parse_any_height(quality)?,
                })
            }
            "cancel" if !rest.is_empty() => Some(Self::Cancel {
                task_id: rest.to_string(),
            }),
            "lang" if !rest.is_empty() => Some(Self::Language(rest.to_string())),
            "setquality" => Quality::parse(rest).map(Self::SetQuality),
            "delcookie" if !rest.is_empty() => Some(Self::DeleteCookie(rest.to_string())),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Download { task_id, quality } => format!("dl:{}:{}", task_id, quality.as_str()),
            Self::Cancel { task_id } => format!("cancel:{}", task_id),
            Self::Language(code) => format!("lang:{}", code),
            Self::SetQuality(quality) => format!("setquality:{}", quality.as_str()),
            Self::DeleteCookie(platform) => format!("delcookie:{}", platform),
        }
    }
}

fn quality_label(quality: Quality, default: Option<Quality>) -> String {
    let base = match quality {
        Quality::Height(h) => format!("{} {}", height_emoji(h), quality.label()),
        other => other.label(),
    };
    if default == Some(quality) {
        format!("{} ✓", base)
    } else {
        base
    }
}

/// Quality picker for an extracted video.
///
/// Unique heights, highest first, at most [`MAX_QUALITY_BUTTONS`], three per
/// row; then one row each for best, audio and cancel. The user's default
/// quality, if offered, is ticked.
pub fn quality_keyboard(
    info: &VideoInfo,
    task_id: &str,
    lang: &LanguageIdentifier,
    default: Option<Quality>,
) -> Keyboard {
    let download = |quality: Quality| {
        CallbackAction::Download {
            task_id: task_id.to_string(),
            quality,
        }
        .encode()
    };

    let mut rows: Vec<Vec<KeyboardButton>> = info
        .available_heights()
        .into_iter()
        .take(MAX_QUALITY_BUTTONS)
        .map(|h| {
            let quality = Quality::Height(h);
            KeyboardButton::new(quality_label(quality, default), download(quality))
        })
        .collect::<Vec<_>>()
        .chunks(BUTTONS_PER_ROW)
        .map(<[KeyboardButton]>::to_vec)
        .collect();

    let mark = |key: &str, quality: Quality| {
        let text = i18n::t(lang, key);
        if default == Some(quality) {
            format!("{} ✓", text)
        } else {
            text
        }
    };
    rows.push(vec![KeyboardButton::new(mark("buttons-best", Quality::Best), download(Quality::Best))]);
    rows.push(vec![KeyboardButton::new(mark("buttons-audio", Quality::Audio), download(Quality::Audio))]);
    rows.push(vec![KeyboardButton::new(
        i18n::t(lang, "buttons-cancel"),
        CallbackAction::Cancel {
            task_id: task_id.to_string(),
        }
        .encode(),
    )]);

    Keyboard::new(rows)
}

/// Language picker; the current language is ticked.
pub fn language_keyboard(current: &str) -> Keyboard {
    let rows = SUPPORTED_LANGS
        .iter()
        .map(|(code, name)| {
            let text = if code.eq_ignore_ascii_case(current) {
                format!("{} ✓", name)
            } else {
                name.to_string()
            };
            vec![KeyboardButton::new(text, CallbackAction::Language(code.to_string()).encode())]
        })
        .collect();
    Keyboard::new(rows)
}

/// Default-quality picker used by `/quality`.
pub fn default_quality_keyboard(lang: &LanguageIdentifier, current: Option<Quality>) -> Keyboard {
    let mut rows: Vec<Vec<KeyboardButton>> = PRESET_HEIGHTS
        .iter()
        .map(|h| {
            let quality = Quality::Height(*h);
            KeyboardButton::new(
                quality_label(quality, current),
                CallbackAction::SetQuality(quality).encode(),
            )
        })
        .collect::<Vec<_>>()
        .chunks(BUTTONS_PER_ROW)
        .map(<[KeyboardButton]>::to_vec)
        .collect();

    for (key, quality) in [("quality-best", Quality::Best), ("quality-audio", Quality::Audio)] {
        let mut text = i18n::t(lang, key);
        if current == Some(quality) {
            text.push_str(" ✓");
        }
        rows.push(vec![KeyboardButton::new(text, CallbackAction::SetQuality(quality).encode())]);
    }
    Keyboard::new(rows)
}

/// One delete button per stored cookie platform.
pub fn cookie_delete_keyboard(platforms: &[String]) -> Keyboard {
    let rows = platforms
        .iter()
        .map(|p| {
            vec![KeyboardButton::new(
                format!("🗑 {}", p),
                CallbackAction::DeleteCookie(p.clone()).encode(),
            )]
        })
        .collect();
    Keyboard::new(rows)
}
