//! [`VideoEngine`] implementation that drives the `yt-dlp` binary.
//!
//! Metadata comes from `yt-dlp -J`. Downloads run on a blocking thread: the
//! child's stdout and stderr are read line by line, JSON progress lines are
//! turned into [`RawProgressEvent`]s for the hook, and a watchdog kills the
//! child when the deadline passes. The final path is printed by yt-dlp after
//! post-processing; a directory scan covers the case where it is missing.
//!
//! Some aborts (`--max-filesize`) are only reported on stdout with a zero exit
//! code, so the tail of stdout is classified along with stderr.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::core::validation::detect_platform;
use crate::download::engine::{
    DownloadOutcome, EngineOptions, FormatInfo, RawProgressEvent, SharedHook, VideoEngine, VideoInfo,
};
use crate::download::ytdlp_errors::{classify_error, summarize_error, FailureKind};

/// Marker put in front of every progress line through `--progress-template`.
const PROGRESS_PREFIX: &str = "[progress]";

/// Extensions accepted when scanning for the produced file.
const MEDIA_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "avi", "flv", "m4a", "mp3", "aac", "opus", "ogg", "flac", "wav",
];

const TAIL_LINES: usize = 50;

/// Logs the installed yt-dlp version; a missing binary is only a warning.
pub async fn log_version(bin: &str) {
    match timeout(Duration::from_secs(10), TokioCommand::new(bin).arg("--version").output()).await {
        Ok(Ok(output)) if output.status.success() => {
            log::info!("yt-dlp version: {}", String::from_utf8_lossy(&output.stdout).trim());
        }
        Ok(Ok(output)) => log::warn!("yt-dlp --version exited with {:?}", output.status.code()),
        Ok(Err(e)) => log::warn!("Failed to run {}: {}. Downloads will fail until it is installed.", bin, e),
        Err(_) => log::warn!("yt-dlp --version timed out"),
    }
}

/// The yt-dlp subprocess engine.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    bin: String,
}

impl YtDlpEngine {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn from_config() -> Self {
        Self::new(config::YTDL_BIN.clone())
    }
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::from_config()
    }
}

fn push_common_args(args: &mut Vec<String>, options: &EngineOptions) {
    args.push("--no-playlist".to_string());
    args.push("--retries".to_string());
    args.push(options.retries.to_string());
    args.push("--socket-timeout".to_string());
    args.push(options.socket_timeout.as_secs().to_string());
    if let Some(cookie_file) = &options.cookie_file {
        args.push("--cookies".to_string());
        args.push(cookie_file.display().to_string());
    }
}

/// Arguments for a metadata-only run.
pub fn build_extract_args(url: &str, options: &EngineOptions) -> Vec<String> {
    let mut args = vec!["-J".to_string(), "--no-warnings".to_string()];
    push_common_args(&mut args, options);
    args.push(url.to_string());
    args
}

/// Arguments for a download run.
pub fn build_download_args(url: &str, options: &EngineOptions) -> Vec<String> {
    let mut args = vec![
        "--newline".to_string(),
        "--progress".to_string(),
        "--progress-template".to_string(),
        format!("download:{}%(progress)j", PROGRESS_PREFIX),
        "--print".to_string(),
        "after_move:filepath".to_string(),
        // --print implies --quiet, which would hide abort notices
        "--no-quiet".to_string(),
        "-f".to_string(),
        options.format_selector.clone(),
        "-o".to_string(),
        options.output_template.clone(),
        "--concurrent-fragments".to_string(),
        options.concurrent_fragments.to_string(),
    ];
    push_common_args(&mut args, options);

    if options.extract_audio {
        args.extend(
            ["-x", "--audio-format", "mp3", "--audio-quality", "320K"]
                .iter()
                .map(|s| s.to_string()),
        );
    } else {
        args.push("--merge-output-format".to_string());
        args.push(options.merge_output_format.clone());
    }

    if let Some(max) = options.max_filesize {
        args.push("--max-filesize".to_string());
        args.push(max.to_string());
    }

    args.push(url.to_string());
    args
}

/// Parses one progress line emitted through the progress template.
pub fn parse_progress_line(line: &str) -> Option<RawProgressEvent> {
    let json = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    match serde_json::from_str(json.trim()) {
        Ok(event) => Some(event),
        Err(e) => {
            log::debug!("Unparseable progress line {:?}: {}", line, e);
            None
        }
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_format(value: &Value) -> FormatInfo {
    FormatInfo {
        format_id: as_string(&value["format_id"]).unwrap_or_default(),
        ext: as_string(&value["ext"]).unwrap_or_default(),
        height: as_u64(&value["height"]).map(|h| h as u32),
        width: as_u64(&value["width"]).map(|w| w as u32),
        fps: value["fps"].as_f64(),
        filesize: as_u64(&value["filesize"]).or_else(|| as_u64(&value["filesize_approx"])),
        vcodec: as_string(&value["vcodec"]),
        acodec: as_string(&value["acodec"]),
        abr: value["abr"].as_f64(),
        vbr: value["vbr"].as_f64(),
        note: as_string(&value["format_note"]),
    }
}

/// Builds [`VideoInfo`] from `yt-dlp -J` output.
///
/// Returns `None` for `null` output or a playlist without entries.
pub fn parse_video_info(json: &Value, url: &str) -> Option<VideoInfo> {
    let json = if json["_type"].as_str() == Some("playlist") {
        json["entries"].as_array()?.iter().find(|e| !e.is_null())?
    } else {
        json
    };
    if !json.is_object() {
        return None;
    }

    let formats = json["formats"]
        .as_array()
        .map(|fs| fs.iter().map(parse_format).collect())
        .unwrap_or_default();

    Some(VideoInfo {
        url: url.to_string(),
        title: as_string(&json["title"]).unwrap_or_else(|| "video".to_string()),
        duration: as_u64(&json["duration"]),
        uploader: as_string(&json["uploader"]).or_else(|| as_string(&json["channel"])),
        view_count: as_u64(&json["view_count"]),
        like_count: as_u64(&json["like_count"]),
        description: as_string(&json["description"]),
        thumbnail: as_string(&json["thumbnail"]),
        upload_date: as_string(&json["upload_date"]),
        platform: Some(detect_platform(url)),
        formats,
        is_live: json["is_live"].as_bool().unwrap_or(false),
        is_private: json["availability"].as_str() == Some("private"),
        age_restricted: as_u64(&json["age_limit"]).unwrap_or(0) > 0,
        extractor: as_string(&json["extractor_key"]).or_else(|| as_string(&json["extractor"])),
        webpage_url: as_string(&json["webpage_url"]),
    })
}

/// Finds a media file produced for `output_template` by prefix.
///
/// The prefix is the template's file name up to its first `%(` field. Partial
/// downloads are ignored; the most recently modified match wins.
pub fn find_downloaded_file(output_template: &str) -> Option<PathBuf> {
    let template = Path::new(output_template);
    let dir = template.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = template.file_name()?.to_str()?;
    let prefix = name.split("%(").next().unwrap_or(name).trim_end_matches('.');
    if prefix.is_empty() {
        return None;
    }

    std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .filter(|entry| {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            file_name.starts_with(prefix) && MEDIA_EXTENSIONS.iter().any(|m| m.eq_ignore_ascii_case(ext))
        })
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().ok()?;
            Some((modified, entry.path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

/// Everything observed while the child ran.
#[derive(Debug, Default)]
pub(crate) struct RunOutput {
    pub(crate) status: Option<ExitStatus>,
    /// Last non-progress stdout lines: the printed path and screen messages
    pub(crate) stdout_tail: Vec<String>,
    pub(crate) stderr_tail: String,
    pub(crate) timed_out: bool,
    pub(crate) spawn_error: Option<String>,
}

fn push_tail(tail: &Mutex<VecDeque<String>>, line: String) {
    if let Ok(mut lines) = tail.lock() {
        lines.push_back(line);
        if lines.len() > TAIL_LINES {
            lines.pop_front();
        }
    }
}

fn run_blocking(bin: &str, args: &[String], hook: SharedHook, deadline: Duration) -> RunOutput {
    let mut output = RunOutput::default();

    let mut child = match Command::new(bin)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            output.spawn_error = Some(format!("failed to spawn {}: {}", bin, e));
            return output;
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let child = Arc::new(Mutex::new(child));

    let timed_out = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let watchdog = {
        let child = Arc::clone(&child);
        let timed_out = Arc::clone(&timed_out);
        thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(deadline) {
                timed_out.store(true, Ordering::SeqCst);
                if let Ok(mut child) = child.lock() {
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill timed-out yt-dlp: {}", e);
                    }
                }
            }
        })
    };

    let stderr_tail = Arc::new(Mutex::new(VecDeque::<String>::new()));
    let stderr_reader = stderr.map(|stream| {
        let tail = Arc::clone(&stderr_tail);
        let hook = Arc::clone(&hook);
        thread::spawn(move || {
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                if let Some(event) = parse_progress_line(&line) {
                    hook.on_event(event);
                } else if !line.trim().is_empty() {
                    log::debug!("yt-dlp stderr: {}", line);
                    push_tail(&tail, line);
                }
            }
        })
    });

    let stdout_tail = Mutex::new(VecDeque::<String>::new());
    if let Some(stream) = stdout {
        for line in BufReader::new(stream).lines().map_while(Result::ok) {
            if let Some(event) = parse_progress_line(&line) {
                hook.on_event(event);
            } else if !line.trim().is_empty() {
                log::debug!("yt-dlp stdout: {}", line);
                push_tail(&stdout_tail, line.trim().to_string());
            }
        }
    }
    output.stdout_tail = stdout_tail
        .into_inner()
        .map(Vec::from)
        .unwrap_or_default();

    if let Some(reader) = stderr_reader {
        let _ = reader.join();
    }

    // Poll so the watchdog can still take the lock and kill
    output.status = loop {
        match child.lock() {
            Ok(mut c) => match c.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {}
                Err(e) => {
                    log::error!("Failed to wait for yt-dlp: {}", e);
                    break None;
                }
            },
            Err(_) => break None,
        }
        thread::sleep(Duration::from_millis(100));
    };

    let _ = done_tx.send(());
    let _ = watchdog.join();

    output.timed_out = timed_out.load(Ordering::SeqCst);
    output.stderr_tail = stderr_tail
        .lock()
        .map(|mut lines| lines.make_contiguous().join("\n"))
        .unwrap_or_default();
    output
}

/// Turns a finished run into a [`DownloadOutcome`].
pub(crate) fn interpret_run(run: RunOutput, output_template: &str) -> DownloadOutcome {
    if let Some(e) = run.spawn_error {
        return DownloadOutcome::failure(FailureKind::Unknown, e);
    }
    if run.timed_out {
        return DownloadOutcome::failure(FailureKind::Timeout, "yt-dlp was killed after the download deadline");
    }

    let screen = run.stdout_tail.join("\n");
    let succeeded = run.status.map(|s| s.success()).unwrap_or(false);
    if !succeeded {
        // stderr carries the ERROR line; screen output only breaks ties
        let (kind, text) = match classify_error(&run.stderr_tail) {
            FailureKind::Unknown => (classify_error(&screen), &screen),
            kind => (kind, &run.stderr_tail),
        };
        let message = match summarize_error(&run.stderr_tail) {
            m if m.is_empty() => summarize_error(text),
            m => m,
        };
        let message = if message.is_empty() {
            format!("yt-dlp exited with {:?}", run.status.and_then(|s| s.code()))
        } else {
            message
        };
        return DownloadOutcome::failure(kind, message);
    }

    let printed = run
        .stdout_tail
        .iter()
        .rev()
        .map(PathBuf::from)
        .find(|p| p.is_file());
    if let Some(path) = printed.or_else(|| find_downloaded_file(output_template)) {
        return DownloadOutcome::Success { path };
    }

    // --max-filesize aborts on stdout with a zero exit code and no file
    let combined = format!("{}\n{}", screen, run.stderr_tail);
    let kind = classify_error(&combined);
    let message = match kind {
        FailureKind::Unknown => "yt-dlp finished but no output file was found".to_string(),
        kind => combined
            .lines()
            .rev()
            .find(|l| classify_error(l) == kind)
            .map(|l| l.trim().to_string())
            .unwrap_or_else(|| summarize_error(&combined)),
    };
    DownloadOutcome::failure(kind, message)
}

#[async_trait]
impl VideoEngine for YtDlpEngine {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    async fn extract_info(&self, url: &str, options: &EngineOptions) -> AppResult<Option<VideoInfo>> {
        let args = build_extract_args(url, options);
        log::debug!("yt-dlp metadata command: {} {}", self.bin, args.join(" "));

        let output = timeout(
            options.timeout,
            TokioCommand::new(&self.bin).args(&args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| AppError::Download(format!("metadata extraction timed out after {:?}", options.timeout)))?
        .map_err(|e| AppError::Download(format!("failed to run {}: {}", self.bin, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("yt-dlp metadata failed for {}: {}", url, summarize_error(&stderr));
            return Err(AppError::Download(summarize_error(&stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        let json: Value = serde_json::from_str(trimmed)?;
        Ok(parse_video_info(&json, url))
    }

    async fn download(&self, url: &str, options: &EngineOptions, hook: SharedHook) -> DownloadOutcome {
        let args = build_download_args(url, options);
        let bin = self.bin.clone();
        let deadline = options.timeout;
        log::debug!("yt-dlp download command: {} {}", bin, args.join(" "));

        let run = match tokio::task::spawn_blocking(move || run_blocking(&bin, &args, hook, deadline)).await {
            Ok(run) => run,
            Err(e) => {
                log::error!("yt-dlp worker thread failed: {}", e);
                return DownloadOutcome::failure(FailureKind::Unknown, format!("download worker failed: {}", e));
            }
        };

        let outcome = interpret_run(run, &options.output_template);
        match &outcome {
            DownloadOutcome::Success { path } => log::info!("yt-dlp produced {}", path.display()),
            DownloadOutcome::Failure { kind, message } => {
                log::warn!("yt-dlp download of {} failed ({}): {}", url, kind, message)
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> EngineOptions {
        EngineOptions {
            format_selector: "bestvideo[height<=720]+bestaudio/best".to_string(),
            output_template: "/tmp/dl/abc.%(ext)s".to_string(),
            ..EngineOptions::default()
        }
    }

    fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn download_args_cover_options() {
        let mut opts = options();
        opts.cookie_file = Some(PathBuf::from("/tmp/c.txt"));
        opts.max_filesize = Some(1000);
        let args = build_download_args("https://youtu.be/x", &opts);

        assert_eq!(arg_after(&args, "-f"), Some("bestvideo[height<=720]+bestaudio/best"));
        assert_eq!(arg_after(&args, "-o"), Some("/tmp/dl/abc.%(ext)s"));
        assert_eq!(arg_after(&args, "--cookies"), Some("/tmp/c.txt"));
        assert_eq!(arg_after(&args, "--max-filesize"), Some("1000"));
        assert_eq!(arg_after(&args, "--merge-output-format"), Some("mp4"));
        assert_eq!(arg_after(&args, "--print"), Some("after_move:filepath"));
        assert!(args.iter().any(|a| a == "--no-quiet"));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
        assert!(!args.iter().any(|a| a == "-x"));
    }

    #[test]
    fn audio_args_extract_mp3() {
        let mut opts = options();
        opts.extract_audio = true;
        let args = build_download_args("https://youtu.be/x", &opts);
        assert!(args.iter().any(|a| a == "-x"));
        assert_eq!(arg_after(&args, "--audio-format"), Some("mp3"));
        assert!(arg_after(&args, "--merge-output-format").is_none());
    }

    #[test]
    fn extract_args() {
        let args = build_extract_args("https://vimeo.com/1", &EngineOptions::default());
        assert_eq!(args[0], "-J");
        assert!(args.iter().any(|a| a == "--no-playlist"));
        assert!(arg_after(&args, "--cookies").is_none());
    }

    #[test]
    fn progress_lines() {
        let event = parse_progress_line(
            r#"[progress]{"status": "downloading", "downloaded_bytes": 10, "total_bytes": 100, "speed": null, "eta": null}"#,
        )
        .unwrap();
        assert_eq!(event.downloaded_bytes, Some(10));
        assert_eq!(event.speed, None);
        assert!(parse_progress_line("/tmp/dl/abc.mp4").is_none());
        assert!(parse_progress_line("[progress]{not json").is_none());
    }

    #[test]
    fn video_info_from_json() {
        let json = json!({
            "title": "Clip",
            "duration": 63.5,
            "channel": "Someone",
            "view_count": 1200,
            "age_limit": 18,
            "availability": "public",
            "extractor_key": "Youtube",
            "formats": [
                {"format_id": "137", "ext": "mp4", "height": 1080, "vcodec": "avc1", "filesize_approx": 5000},
                {"format_id": "140", "ext": "m4a", "vcodec": "none", "acodec": "mp4a", "abr": 128.0},
                {"format_id": "22", "ext": "mp4", "height": 720, "vcodec": "avc1", "filesize": 3000}
            ]
        });
        let info = parse_video_info(&json, "https://www.youtube.com/watch?v=abc123").unwrap();
        assert_eq!(info.title, "Clip");
        assert_eq!(info.duration, Some(63));
        assert_eq!(info.uploader.as_deref(), Some("Someone"));
        assert!(info.age_restricted);
        assert!(!info.is_private);
        assert_eq!(info.formats[0].filesize, Some(5000));
        assert!(info.formats[1].is_audio_only());
        assert_eq!(info.available_heights(), vec![1080, 720]);
        assert_eq!(info.platform, Some(crate::core::validation::Platform::Youtube));
    }

    #[test]
    fn playlist_uses_first_entry() {
        let json = json!({"_type": "playlist", "entries": [null, {"title": "First"}]});
        assert_eq!(parse_video_info(&json, "https://x.com/a").unwrap().title, "First");
        assert!(parse_video_info(&json!({"_type": "playlist", "entries": []}), "u").is_none());
        assert!(parse_video_info(&Value::Null, "u").is_none());
    }

    #[test]
    fn scan_finds_media_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("task1.mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("other.mp4"), b"x").unwrap();
        assert!(find_downloaded_file(&dir.path().join("task1.%(ext)s").to_string_lossy()).is_none());

        std::fs::write(dir.path().join("task1.mp4"), b"x").unwrap();
        let found = find_downloaded_file(&dir.path().join("task1.%(ext)s").to_string_lossy()).unwrap();
        assert_eq!(found.file_name().unwrap(), "task1.mp4");
    }

    #[test]
    fn interpret_spawn_error_and_timeout() {
        let run = RunOutput {
            spawn_error: Some("no such file".to_string()),
            ..RunOutput::default()
        };
        assert!(matches!(
            interpret_run(run, "/tmp/x.%(ext)s"),
            DownloadOutcome::Failure {
                kind: FailureKind::Unknown,
                ..
            }
        ));

        let run = RunOutput {
            timed_out: true,
            ..RunOutput::default()
        };
        assert!(matches!(
            interpret_run(run, "/tmp/x.%(ext)s"),
            DownloadOutcome::Failure {
                kind: FailureKind::Timeout,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn engine_failure_is_classified() {
        let hook: SharedHook = Arc::new(crate::download::engine::NoopHook);
        let args = vec![
            "-c".to_string(),
            "echo 'ERROR: [youtube] abc: Private video' >&2; exit 1".to_string(),
        ];
        let run = run_blocking("sh", &args, hook, Duration::from_secs(10));
        match interpret_run(run, "/nonexistent/x.%(ext)s") {
            DownloadOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::Private);
                assert!(message.contains("Private video"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn max_filesize_abort_on_stdout_is_too_large() {
        let hook: SharedHook = Arc::new(crate::download::engine::NoopHook);
        let args = vec![
            "-c".to_string(),
            "echo '[youtube] abc: Downloading webpage'; \
             printf '\\r[download] File is larger than max-filesize (60000000 bytes > 52428800 bytes). Aborting.\\n'; \
             exit 0"
                .to_string(),
        ];
        let run = run_blocking("sh", &args, hook, Duration::from_secs(10));
        match interpret_run(run, "/nonexistent/x.%(ext)s") {
            DownloadOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::FileTooLarge);
                assert!(message.starts_with("[download] File is larger"), "{}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn screen_output_does_not_override_stderr() {
        let hook: SharedHook = Arc::new(crate::download::engine::NoopHook);
        let args = vec![
            "-c".to_string(),
            "echo '[download] Got error: connection reset'; echo 'ERROR: Private video' >&2; exit 1".to_string(),
        ];
        let run = run_blocking("sh", &args, hook, Duration::from_secs(10));
        assert!(matches!(
            interpret_run(run, "/nonexistent/x.%(ext)s"),
            DownloadOutcome::Failure {
                kind: FailureKind::Private,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn deadline_kills_child() {
        let hook: SharedHook = Arc::new(crate::download::engine::NoopHook);
        let args = vec!["-c".to_string(), "exec sleep 30".to_string()];
        let run = run_blocking("sh", &args, hook, Duration::from_millis(200));
        assert!(run.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn printed_path_and_progress_are_reported() {
        struct Collect(Mutex<Vec<RawProgressEvent>>);
        impl crate::download::engine::ProgressHook for Collect {
            fn on_event(&self, event: RawProgressEvent) {
                self.0.lock().unwrap().push(event);
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("t.mp4");
        std::fs::write(&file, b"video").unwrap();
        let script = format!(
            "echo '[progress]{{\"status\":\"downloading\",\"downloaded_bytes\":5,\"total_bytes\":10}}'; \
             echo '[progress]{{\"status\":\"finished\"}}'; echo '{}'",
            file.display()
        );
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let hook: SharedHook = collect.clone();
        let run = run_blocking("sh", &["-c".to_string(), script], hook, Duration::from_secs(10));

        assert_eq!(
            interpret_run(run, "/nonexistent/x.%(ext)s"),
            DownloadOutcome::Success { path: file }
        );
        let events = collect.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].status, "finished");
    }
}
