//! Handler types, dependencies, and user management helpers

use std::sync::Arc;

use chrono::Utc;
use teloxide::types::Message;
use unic_langid::LanguageIdentifier;

use crate::core::config;
use crate::core::error::AppResult;
use crate::core::rate_limiter::RateWindow;
use crate::download::pipeline::PipelineDeps;
use crate::download::registry::TaskRegistry;
use crate::download::Quality;
use crate::i18n;
use crate::storage::db::{self, DbPool, User};
use crate::telegram::guards::{AccessPolicy, GuardChain, GuardEnv, GuardOutcome, Requester};
use crate::telegram::sink::{ChatSink, Keyboard};

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    pub pipeline: PipelineDeps,
    pub rate_window: Arc<RateWindow>,
    pub policy: Arc<AccessPolicy>,
}

impl HandlerDeps {
    /// Create new handler dependencies
    pub fn new(pipeline: PipelineDeps, rate_window: Arc<RateWindow>, policy: Arc<AccessPolicy>) -> Self {
        Self {
            pipeline,
            rate_window,
            policy,
        }
    }

    pub fn sink(&self) -> &Arc<dyn ChatSink> {
        &self.pipeline.sink
    }

    pub fn pool(&self) -> &Arc<DbPool> {
        &self.pipeline.pool
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.pipeline.registry
    }

    pub fn guard_env(&self) -> GuardEnv {
        GuardEnv {
            policy: Arc::clone(&self.policy),
            rate_window: Arc::clone(&self.rate_window),
            registry: Arc::clone(&self.pipeline.registry),
        }
    }

    /// Sends an HTML message, logging instead of failing.
    pub async fn reply(&self, chat_id: i64, text: &str, keyboard: Option<Keyboard>) -> Option<i32> {
        match self.sink().send_message(chat_id, text, keyboard).await {
            Ok(message_id) => Some(message_id),
            Err(e) => {
                log::warn!("Failed to send message to chat {}: {}", chat_id, e);
                None
            }
        }
    }
}

/// Telegram profile of the sender of an update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInfo {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
}

impl UserInfo {
    pub fn from_user(user: &teloxide::types::User) -> Self {
        Self {
            id: i64::try_from(user.id.0).unwrap_or(0),
            username: user.username.clone(),
            first_name: Some(user.first_name.clone()),
            last_name: user.last_name.clone(),
            language_code: user.language_code.clone(),
        }
    }

    /// Extract user info from a Telegram message; channel posts have no sender.
    pub fn from_message(msg: &Message) -> Option<Self> {
        msg.from.as_ref().map(Self::from_user)
    }
}

/// Creates or refreshes the stored profile and returns it.
///
/// New users get their Telegram language if it is supported, the default otherwise.
pub fn register_user(pool: &DbPool, info: &UserInfo) -> AppResult<Option<User>> {
    let conn = db::get_connection(pool)?;
    let language = info
        .language_code
        .as_deref()
        .and_then(i18n::is_language_supported)
        .unwrap_or_else(|| i18n::is_language_supported(&config::DEFAULT_LANGUAGE).unwrap_or("en"));
    let quality = Quality::parse_or_default(&config::DEFAULT_QUALITY).as_str();

    db::upsert_user(
        &conn,
        info.id,
        info.username.as_deref(),
        info.first_name.as_deref(),
        info.last_name.as_deref(),
        language,
        &quality,
    )?;
    Ok(db::get_user(&conn, info.id)?)
}

/// The sender of an update, resolved against the database.
#[derive(Debug, Clone)]
pub struct Caller {
    pub info: UserInfo,
    pub chat_id: i64,
    /// `None` when the database is unavailable
    pub user: Option<User>,
    pub lang: LanguageIdentifier,
}

impl Caller {
    /// Registers the sender and resolves their language.
    pub fn load(deps: &HandlerDeps, info: UserInfo, chat_id: i64) -> Self {
        let user = match register_user(deps.pool(), &info) {
            Ok(user) => user,
            Err(e) => {
                log::error!("Failed to register user {}: {}", info.id, e);
                None
            }
        };
        let lang = match &user {
            Some(user) => i18n::lang_from_code(&user.language),
            None => info
                .language_code
                .as_deref()
                .map(i18n::lang_from_code)
                .unwrap_or_else(i18n::default_lang),
        };
        Self {
            info,
            chat_id,
            user,
            lang,
        }
    }

    pub fn id(&self) -> i64 {
        self.info.id
    }

    pub fn is_vip(&self) -> bool {
        self.user.as_ref().is_some_and(|u| u.is_vip_active(Utc::now()))
    }

    /// The user's stored default quality.
    pub fn default_quality(&self) -> Quality {
        self.user
            .as_ref()
            .map(|u| Quality::parse_or_default(&u.default_quality))
            .unwrap_or_else(|| Quality::parse_or_default(&config::DEFAULT_QUALITY))
    }

    /// Runs `chain` for this caller.
    pub async fn guard(&self, deps: &HandlerDeps, chain: &GuardChain) -> GuardOutcome {
        let requester = Requester {
            user_id: self.id(),
            user: self.user.as_ref(),
            lang: &self.lang,
        };
        chain.check(&deps.guard_env(), &requester).await
    }

    /// Runs `chain`; on rejection replies in the chat and returns `false`.
    pub async fn passes(&self, deps: &HandlerDeps, chain: &GuardChain) -> bool {
        match self.guard(deps, chain).await {
            GuardOutcome::Proceed => true,
            GuardOutcome::Reject(text) => {
                deps.reply(self.chat_id, &text, None).await;
                false
            }
        }
    }
}
