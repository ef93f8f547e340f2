use std::time::Duration;

/// Escapes text for Telegram HTML parse mode.
///
/// Only `<`, `>` and `&` are special in Telegram HTML; quotes are escaped as
/// well so the result is also safe inside attribute values.
///
/// # Example
///
/// ```
/// use vidgrab::core::utils::escape_html;
///
/// assert_eq!(escape_html("Tom & <Jerry>"), "Tom &amp; &lt;Jerry&gt;");
/// ```
pub fn escape_html(text: &str) -> String {
    let mut result = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    result
}

/// Shortens text to `max_chars` characters, appending `...` when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

/// Formats a byte count with binary units and one decimal (`1.5 MB`).
///
/// # Example
///
/// ```
/// use vidgrab::core::utils::format_file_size;
///
/// assert_eq!(format_file_size(0), "0 B");
/// assert_eq!(format_file_size(1536), "1.5 KB");
/// ```
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}

/// Formats a transfer rate (`2.0 MB/s`).
pub fn format_speed(bytes_per_sec: f64) -> String {
    if !bytes_per_sec.is_finite() || bytes_per_sec <= 0.0 {
        return format!("{}/s", format_file_size(0));
    }
    format!("{}/s", format_file_size(bytes_per_sec as u64))
}

/// Formats seconds as `h:mm:ss`, or `m:ss` under an hour.
///
/// # Example
///
/// ```
/// use vidgrab::core::utils::format_duration;
///
/// assert_eq!(format_duration(65), "1:05");
/// assert_eq!(format_duration(3725), "1:02:05");
/// ```
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Formats process uptime as `Xd Xh Xm Xs`.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!(
        "{}d {}h {}m {}s",
        secs / 86_400,
        (secs % 86_400) / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Formats a large counter compactly (`1.2K`, `3.4M`).
pub fn format_count(n: u64) -> String {
    match n {
        0..=999 => n.to_string(),
        1_000..=999_999 => format!("{:.1}K", n as f64 / 1_000.0),
        1_000_000..=999_999_999 => format!("{:.1}M", n as f64 / 1_000_000.0),
        _ => format!("{:.1}B", n as f64 / 1_000_000_000.0),
    }
}

/// Renders a fixed-width text progress bar.
///
/// `progress` is a percentage; it is clamped to `[0, 100]` before the filled
/// share is computed.
///
/// # Example
///
/// ```
/// use vidgrab::core::utils::progress_bar;
///
/// assert_eq!(progress_bar(50.0, 10), "█████░░░░░");
/// assert_eq!(progress_bar(250.0, 4), "████");
/// ```
pub fn progress_bar(progress: f64, width: usize) -> String {
    let ratio = if progress.is_finite() {
        (progress / 100.0).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = ((ratio * width as f64).round() as usize).min(width);
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

/// Extracts retry-after seconds from a Telegram rate limit error text.
pub fn extract_retry_after(error_str: &str) -> Option<u64> {
    let lower = error_str.to_lowercase();

    if let Some(pos) = lower.find("retry after ") {
        let after = &lower[pos + 12..];
        let num: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(secs) = num.parse() {
            return Some(secs);
        }
    }

    if let Some(pos) = lower.find("retry_after") {
        let after = &lower[pos + 11..];
        let num: String = after
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(secs) = num.parse() {
            return Some(secs);
        }
    }

    None
}
