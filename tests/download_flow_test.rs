//! End-to-end tests of the link → quality picker → download → upload flow
//!
//! Handlers and the pipeline run against a recording chat sink and a scripted
//! engine, with a real SQLite database in a temporary folder.
//!
//! Run with: cargo test --test download_flow_test

mod common;
mod mocks;

use std::time::Duration;

use fluent_templates::fluent_bundle::FluentArgs;
use pretty_assertions::assert_eq;
use vidgrab::download::pipeline::{failure_text, run_download, upload_too_large_text, PipelineOutcome};
use vidgrab::download::{FailureKind, Quality, TaskStatus};
use vidgrab::i18n;
use vidgrab::storage::db;
use vidgrab::telegram::handlers::{handle_callback, handle_url_message, UrlOutcome};
use vidgrab::telegram::sink::FileKind;

use common::{TestEnv, USER_ID};
use mocks::ScriptedEngine;

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

/// Submits `VIDEO_URL` and returns the new task ID.
async fn submit(env: &TestEnv) -> String {
    let caller = env.caller(USER_ID);
    match handle_url_message(&env.deps, &caller, VIDEO_URL).await.unwrap() {
        UrlOutcome::Registered { task_id } => task_id,
        other => panic!("expected a registered task, got {:?}", other),
    }
}

fn callback_rows(keyboard: &vidgrab::telegram::sink::Keyboard) -> Vec<Vec<String>> {
    keyboard
        .rows
        .iter()
        .map(|row| row.iter().map(|b| b.callback_data.clone()).collect())
        .collect()
}

#[tokio::test]
async fn link_shows_quality_picker() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Never Gonna", &[480, 1080, 720, 1080]));
    let task_id = submit(&env).await;

    assert_eq!(task_id.len(), 32);
    let task = env.registry().get(&task_id).await.unwrap();
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.user_id, USER_ID);

    // The extracting message is the one that becomes the picker
    let (text, keyboard) = env.sink.last_edit_of(task.message_id).unwrap();
    assert!(text.contains("Never Gonna"), "{}", text);

    let rows = callback_rows(&keyboard.unwrap());
    assert_eq!(
        rows,
        vec![
            vec![
                format!("dl:{}:1080", task_id),
                format!("dl:{}:720", task_id),
                format!("dl:{}:480", task_id),
            ],
            vec![format!("dl:{}:best", task_id)],
            vec![format!("dl:{}:audio", task_id)],
            vec![format!("cancel:{}", task_id)],
        ]
    );
}

#[tokio::test]
async fn non_links_are_rejected_without_using_quota() {
    let env = TestEnv::new(ScriptedEngine::with_heights("x", &[720]));
    let caller = env.caller(USER_ID);

    let outcome = handle_url_message(&env.deps, &caller, "hello there").await.unwrap();
    assert_eq!(outcome, UrlOutcome::InvalidUrl);
    assert_eq!(env.sink.sent_texts(), vec![i18n::t(&caller.lang, "errors-invalid-url")]);
    assert_eq!(env.deps.rate_window.remaining(USER_ID, 5, Duration::from_secs(86_400)), 5);
    assert_eq!(env.engine.extract_calls(), 0);
}

#[tokio::test]
async fn sixth_link_of_the_day_is_rejected() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Clip", &[720]));
    for _ in 0..5 {
        submit(&env).await;
    }
    assert_eq!(env.registry().count_for_user(USER_ID).await, 5);

    let caller = env.caller(USER_ID);
    let outcome = handle_url_message(&env.deps, &caller, VIDEO_URL).await.unwrap();
    assert_eq!(outcome, UrlOutcome::Rejected);
    assert_eq!(env.registry().count_for_user(USER_ID).await, 5);

    let mut args = FluentArgs::new();
    args.set("limit", 5);
    let expected = i18n::t_args(&caller.lang, "errors-rate-limit", &args);
    assert_eq!(env.sink.sent_texts().last(), Some(&expected));

    // Same URL every time: only the first submission reached the engine
    assert_eq!(env.engine.extract_calls(), 1);
}

#[tokio::test]
async fn extraction_failure_leaves_no_task() {
    let env = TestEnv::new(ScriptedEngine::with_heights("x", &[720]).extracts_nothing());
    let caller = env.caller(USER_ID);

    let outcome = handle_url_message(&env.deps, &caller, VIDEO_URL).await.unwrap();
    assert_eq!(outcome, UrlOutcome::Unavailable);
    assert_eq!(env.registry().global_count().await, 0);

    let (text, keyboard) = env.sink.last_edit_of(100).unwrap();
    assert_eq!(text, i18n::t(&caller.lang, "errors-extraction-failed"));
    assert!(keyboard.is_none());
}

#[tokio::test]
async fn classified_extraction_error_is_explained() {
    let env = TestEnv::new(
        ScriptedEngine::with_heights("x", &[720]).extraction_fails("ERROR: [youtube] abc: Private video. Sign in"),
    );
    let caller = env.caller(USER_ID);

    handle_url_message(&env.deps, &caller, VIDEO_URL).await.unwrap();
    let (text, _) = env.sink.last_edit_of(100).unwrap();
    assert_eq!(text, i18n::t(&caller.lang, "errors-private-video"));
}

#[tokio::test]
async fn successful_download_is_delivered_and_recorded() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Cats", &[720]).downloads_file("mp4", 4096));
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let lang = i18n::lang_from_code("en");

    let outcome = run_download(&env.deps.pipeline, USER_ID, &task_id, Quality::Height(720), &lang).await;
    assert_eq!(outcome, PipelineOutcome::Completed);
    assert_eq!(task.status(), TaskStatus::Completed);
    assert!(env.registry().get(&task_id).await.is_none());

    let files = env.sink.files();
    assert_eq!(files.len(), 1);
    let (path, caption, kind) = &files[0];
    assert_eq!(*kind, FileKind::Video);
    assert!(caption.contains("Cats"), "{}", caption);
    assert!(caption.contains("720p"), "{}", caption);
    assert!(caption.contains("4.0 KB"), "{}", caption);
    assert!(caption.contains("3:32"), "{}", caption);
    assert!(!path.exists(), "downloaded file should be removed after upload");
    assert_eq!(env.sink.deleted(), vec![task.message_id]);

    let options = env.engine.last_options().unwrap();
    assert_eq!(options.format_selector, Quality::Height(720).selector());
    assert!(!options.extract_audio);

    let conn = env.conn();
    let user = db::get_user(&conn, USER_ID).unwrap().unwrap();
    assert_eq!(user.successful_downloads, 1);
    assert_eq!(user.total_size, 4096);
    let history = db::get_download_history(&conn, USER_ID, 10, 0).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "completed");
    assert_eq!(history[0].quality.as_deref(), Some("720"));
}

#[tokio::test]
async fn audio_pick_is_sent_as_audio() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Song", &[720]).downloads_file("mp3", 512));
    let task_id = submit(&env).await;
    let lang = i18n::lang_from_code("en");

    let outcome = run_download(&env.deps.pipeline, USER_ID, &task_id, Quality::Audio, &lang).await;
    assert_eq!(outcome, PipelineOutcome::Completed);
    assert!(env.engine.last_options().unwrap().extract_audio);
    assert_eq!(env.sink.files()[0].2, FileKind::Audio);
}

#[tokio::test]
async fn upload_failure_is_reported_once() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Big", &[1080]));
    env.sink.fail_uploads();
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let lang = i18n::lang_from_code("en");

    let outcome = run_download(&env.deps.pipeline, USER_ID, &task_id, Quality::Height(1080), &lang).await;
    assert_eq!(outcome, PipelineOutcome::DeliveryFailed);
    assert_eq!(task.status(), TaskStatus::Failed);

    let (text, keyboard) = env.sink.last_edit_of(task.message_id).unwrap();
    assert_eq!(text, i18n::t(&lang, "errors-upload-failed"));
    assert!(keyboard.is_none());
    assert!(env.sink.deleted().is_empty());

    let conn = env.conn();
    let user = db::get_user(&conn, USER_ID).unwrap().unwrap();
    assert_eq!(user.failed_downloads, 1);
    assert_eq!(user.successful_downloads, 0);
    let history = db::get_download_history(&conn, USER_ID, 10, 0).unwrap();
    assert!(history.iter().all(|h| h.status != "completed"));
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn oversized_file_is_a_delivery_failure() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Huge", &[1080]).downloads_file("mp4", 4096));
    let mut pipeline = env.deps.pipeline.clone();
    pipeline.max_file_size = 1024;
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let lang = i18n::lang_from_code("en");

    let outcome = run_download(&pipeline, USER_ID, &task_id, Quality::Height(1080), &lang).await;
    assert_eq!(outcome, PipelineOutcome::DeliveryFailed);
    assert_eq!(task.status(), TaskStatus::Failed);
    assert!(env.sink.files().is_empty());

    let (text, keyboard) = env.sink.last_edit_of(task.message_id).unwrap();
    assert_eq!(text, upload_too_large_text(&lang, 4096, 1024));
    assert_ne!(text, failure_text(&lang, FailureKind::FileTooLarge, 1024));
    assert!(keyboard.is_none());

    let template = env.engine.last_options().unwrap().output_template;
    assert!(!std::path::Path::new(&template.replace("%(ext)s", "mp4")).exists());

    let conn = env.conn();
    let user = db::get_user(&conn, USER_ID).unwrap().unwrap();
    assert_eq!(user.failed_downloads, 1);
    let history = db::get_download_history(&conn, USER_ID, 10, 0).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "failed");
    assert_eq!(history[0].file_size, 4096);
}

#[tokio::test]
async fn cancel_after_download_skips_upload() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Long", &[720]));
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let lang = i18n::lang_from_code("en");

    let flagged = task.clone();
    env.engine.on_finish(move || {
        flagged.cancel();
    });

    let outcome = run_download(&env.deps.pipeline, USER_ID, &task_id, Quality::Height(720), &lang).await;
    assert_eq!(outcome, PipelineOutcome::Cancelled);
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(env.sink.files().is_empty());

    let template = env.engine.last_options().unwrap().output_template;
    assert!(!std::path::Path::new(&template.replace("%(ext)s", "mp4")).exists());

    let (text, _) = env.sink.last_edit_of(task.message_id).unwrap();
    assert_eq!(text, i18n::t(&lang, "download-cancelled"));

    let history = db::get_download_history(&env.conn(), USER_ID, 10, 0).unwrap();
    assert!(history.iter().all(|h| h.status != "completed"));
}

#[tokio::test]
async fn engine_failure_shows_the_reason() {
    let env = TestEnv::new(
        ScriptedEngine::with_heights("Geo", &[720]).download_fails(FailureKind::GeoRestricted, "not available in your country"),
    );
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let lang = i18n::lang_from_code("en");

    let outcome = run_download(&env.deps.pipeline, USER_ID, &task_id, Quality::Best, &lang).await;
    assert_eq!(outcome, PipelineOutcome::Failed(FailureKind::GeoRestricted));

    let (text, _) = env.sink.last_edit_of(task.message_id).unwrap();
    assert_eq!(text, failure_text(&lang, FailureKind::GeoRestricted, env.deps.pipeline.max_file_size));
    let history = db::get_download_history(&env.conn(), USER_ID, 10, 0).unwrap();
    assert_eq!(history[0].status, "failed");
}

#[tokio::test]
async fn started_task_cannot_be_started_again() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Twice", &[720]));
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let lang = i18n::lang_from_code("en");

    assert!(task.start());
    let outcome = run_download(&env.deps.pipeline, USER_ID, &task_id, Quality::Height(720), &lang).await;
    assert_eq!(outcome, PipelineOutcome::AlreadyStarted);
    assert!(env.sink.files().is_empty());

    // A second click on the picker is answered instead of ignored
    let caller = env.caller(USER_ID);
    let toast = handle_callback(&env.deps, &caller, task.message_id, &format!("dl:{}:720", task_id))
        .await
        .unwrap();
    assert_eq!(toast, Some(i18n::t(&caller.lang, "errors-already-started")));
    assert_eq!(task.status(), TaskStatus::Downloading);
}

#[tokio::test]
async fn cancel_button_finishes_pending_task() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Pick", &[720]));
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();
    let caller = env.caller(USER_ID);

    let toast = handle_callback(&env.deps, &caller, task.message_id, &format!("cancel:{}", task_id))
        .await
        .unwrap();
    assert_eq!(toast, None);
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert!(env.registry().get(&task_id).await.is_none());

    let (text, _) = env.sink.last_edit_of(task.message_id).unwrap();
    assert_eq!(text, i18n::t(&caller.lang, "download-cancelled"));

    // A late quality pick finds nothing
    let toast = handle_callback(&env.deps, &caller, task.message_id, &format!("dl:{}:720", task_id))
        .await
        .unwrap();
    assert_eq!(toast, Some(i18n::t(&caller.lang, "errors-task-not-found")));
}

#[tokio::test]
async fn other_users_cannot_touch_a_task() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Mine", &[720]));
    let task_id = submit(&env).await;
    let stranger = env.caller(777);

    for data in [format!("dl:{}:720", task_id), format!("cancel:{}", task_id)] {
        let toast = handle_callback(&env.deps, &stranger, 100, &data).await.unwrap();
        assert_eq!(toast, Some(i18n::t(&stranger.lang, "errors-not-your-task")));
    }
    assert_eq!(env.registry().get(&task_id).await.unwrap().status(), TaskStatus::Pending);
}

#[tokio::test]
async fn quality_button_runs_the_download() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Button", &[720]));
    let task_id = submit(&env).await;
    let caller = env.caller(USER_ID);

    let toast = handle_callback(&env.deps, &caller, 100, &format!("dl:{}:720", task_id))
        .await
        .unwrap();
    assert_eq!(toast, None);

    // The pipeline runs in the background
    for _ in 0..100 {
        if env.registry().get(&task_id).await.is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(env.registry().get(&task_id).await.is_none());
    assert_eq!(env.sink.files().len(), 1);
}

#[tokio::test]
async fn stale_pickers_expire() {
    let env = TestEnv::new(ScriptedEngine::with_heights("Old", &[720]));
    let task_id = submit(&env).await;
    let task = env.registry().get(&task_id).await.unwrap();

    assert_eq!(
        vidgrab::telegram::handlers::expire_pending_tasks(&env.deps, Duration::from_secs(3600)).await,
        0
    );
    assert_eq!(
        vidgrab::telegram::handlers::expire_pending_tasks(&env.deps, Duration::ZERO).await,
        1
    );
    assert_eq!(task.status(), TaskStatus::Cancelled);
    assert_eq!(env.registry().global_count().await, 0);
}
