//! Common test utilities
//!
//! This module is shared across all integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vidgrab::core::rate_limiter::RateWindow;
use vidgrab::download::{PipelineDeps, TaskRegistry, VideoEngine};
use vidgrab::storage::cookies::CookieCipher;
use vidgrab::storage::db::{self, DbConnection, DbPool};
use vidgrab::telegram::guards::{AccessPolicy, Limits};
use vidgrab::telegram::handlers::{Caller, HandlerDeps, UserInfo};
use vidgrab::telegram::ChatSink;

use crate::mocks::{RecordingSink, ScriptedEngine};

pub const USER_ID: i64 = 4242;
pub const CHAT_ID: i64 = 4242;
pub const OWNER_ID: i64 = 1;

/// Small quotas so limit tests stay short.
pub fn test_limits() -> Limits {
    Limits {
        daily: 5,
        concurrent: 10,
        vip_daily: 20,
        vip_concurrent: 20,
        global_concurrent: 50,
        window: Duration::from_secs(86_400),
    }
}

/// A bot wired to mocks, a temporary database and a temporary download folder.
pub struct TestEnv {
    pub sink: Arc<RecordingSink>,
    pub engine: Arc<ScriptedEngine>,
    pub deps: HandlerDeps,
    // Kept alive for the duration of the test
    _dir: TempDir,
}

impl TestEnv {
    pub fn new(engine: ScriptedEngine) -> Self {
        Self::with_limits(engine, test_limits())
    }

    pub fn with_limits(engine: ScriptedEngine, limits: Limits) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("test.sqlite");
        let download_dir = dir.path().join("downloads");
        std::fs::create_dir_all(&download_dir).expect("download dir");

        let pool: DbPool = db::create_pool(db_path.to_str().expect("utf-8 path")).expect("pool");
        let sink = Arc::new(RecordingSink::new());
        let engine = Arc::new(engine);
        let cipher: &'static CookieCipher = Box::leak(Box::new(CookieCipher::generate()));

        let pipeline = PipelineDeps {
            sink: Arc::clone(&sink) as Arc<dyn ChatSink>,
            registry: Arc::new(TaskRegistry::new()),
            pool: Arc::new(pool),
            engine: Arc::clone(&engine) as Arc<dyn VideoEngine>,
            direct: Arc::clone(&engine) as Arc<dyn VideoEngine>,
            cipher,
            download_dir,
            max_file_size: 50 * 1024 * 1024,
            progress_interval: Duration::ZERO,
        };
        let policy = AccessPolicy {
            maintenance: false,
            maintenance_message: None,
            owner_id: OWNER_ID,
            admin_ids: vec![2],
            limits,
        };
        let deps = HandlerDeps::new(pipeline, Arc::new(RateWindow::new()), Arc::new(policy));

        Self {
            sink,
            engine,
            deps,
            _dir: dir,
        }
    }

    pub fn conn(&self) -> DbConnection {
        db::get_connection(self.deps.pool()).expect("connection")
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.deps.registry()
    }

    /// An English-speaking sender, registered in the database.
    pub fn caller(&self, user_id: i64) -> Caller {
        let info = UserInfo {
            id: user_id,
            username: Some(format!("user{}", user_id)),
            first_name: Some("Test".to_string()),
            last_name: None,
            language_code: Some("en".to_string()),
        };
        Caller::load(&self.deps, info, user_id)
    }
}
