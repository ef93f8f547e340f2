//! Ordered checks run before handler bodies.
//!
//! Each guard either lets the request through or ends it with a localized
//! reply. Chains are evaluated in order and stop at the first rejection, so
//! cheap policy checks run before quota bookkeeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fluent_templates::fluent_bundle::FluentArgs;
use unic_langid::LanguageIdentifier;

use crate::core::config;
use crate::core::rate_limiter::RateWindow;
use crate::download::registry::TaskRegistry;
use crate::i18n;
use crate::storage::db::User;

/// Quotas applied to download requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub daily: usize,
    pub concurrent: usize,
    pub vip_daily: usize,
    pub vip_concurrent: usize,
    pub global_concurrent: usize,
    /// Span of the rolling daily quota
    pub window: Duration,
}

impl Limits {
    pub fn from_config() -> Self {
        Self {
            daily: *config::limits::DAILY_LIMIT,
            concurrent: *config::limits::CONCURRENT_LIMIT,
            vip_daily: *config::limits::VIP_DAILY_LIMIT,
            vip_concurrent: *config::limits::VIP_CONCURRENT_LIMIT,
            global_concurrent: *config::limits::GLOBAL_CONCURRENT_LIMIT,
            window: config::limits::daily_window(),
        }
    }

    /// `(daily, concurrent)` for a user.
    pub fn for_user(&self, is_vip: bool) -> (usize, usize) {
        if is_vip {
            (self.vip_daily, self.vip_concurrent)
        } else {
            (self.daily, self.concurrent)
        }
    }
}

/// Access policy: maintenance state, roles and quotas.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub maintenance: bool,
    pub maintenance_message: Option<String>,
    pub owner_id: i64,
    pub admin_ids: Vec<i64>,
    pub limits: Limits,
}

impl AccessPolicy {
    pub fn from_config() -> Self {
        Self {
            maintenance: *config::maintenance::ENABLED,
            maintenance_message: config::maintenance::MESSAGE.clone(),
            owner_id: *config::OWNER_ID,
            admin_ids: config::admin::ADMIN_IDS.clone(),
            limits: Limits::from_config(),
        }
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        user_id != 0 && user_id == self.owner_id
    }

    /// The owner is always an admin.
    pub fn is_admin(&self, user_id: i64) -> bool {
        self.is_owner(user_id) || self.admin_ids.contains(&user_id)
    }
}

/// One check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Rejects everyone but the owner while maintenance is on
    Maintenance,
    NotBanned,
    Admin,
    Owner,
    /// Records one action in the rolling daily window
    DailyQuota,
    UserConcurrency,
    GlobalConcurrency,
}

/// Verdict of a guard or chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Proceed,
    /// Stop and send this text to the user
    Reject(String),
}

impl GuardOutcome {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed)
    }
}

/// Shared state the guards read.
#[derive(Clone)]
pub struct GuardEnv {
    pub policy: Arc<AccessPolicy>,
    pub rate_window: Arc<RateWindow>,
    pub registry: Arc<TaskRegistry>,
}

/// Who is asking.
pub struct Requester<'a> {
    pub user_id: i64,
    /// Stored profile, if the user is known
    pub user: Option<&'a User>,
    pub lang: &'a LanguageIdentifier,
}

impl Requester<'_> {
    fn is_vip(&self) -> bool {
        self.user.is_some_and(|u| u.is_vip_active(Utc::now()))
    }
}

/// An ordered list of guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardChain {
    guards: Vec<Guard>,
}

impl GuardChain {
    pub fn new(guards: Vec<Guard>) -> Self {
        Self { guards }
    }

    /// Any user-facing command.
    pub fn user() -> Self {
        Self::new(vec![Guard::Maintenance, Guard::NotBanned])
    }

    pub fn admin() -> Self {
        Self::new(vec![Guard::Maintenance, Guard::NotBanned, Guard::Admin])
    }

    pub fn owner() -> Self {
        Self::new(vec![Guard::Maintenance, Guard::NotBanned, Guard::Owner])
    }

    /// URL submissions.
    pub fn download() -> Self {
        Self::new(vec![
            Guard::Maintenance,
            Guard::NotBanned,
            Guard::DailyQuota,
            Guard::UserConcurrency,
            Guard::GlobalConcurrency,
        ])
    }

    pub fn guards(&self) -> &[Guard] {
        &self.guards
    }

    /// Runs the guards in order; the first rejection wins.
    pub async fn check(&self, env: &GuardEnv, requester: &Requester<'_>) -> GuardOutcome {
        for guard in &self.guards {
            let outcome = check_one(*guard, env, requester).await;
            if let GuardOutcome::Reject(_) = &outcome {
                log::info!("User {} stopped by {:?} guard", requester.user_id, guard);
                return outcome;
            }
        }
        GuardOutcome::Proceed
    }
}

async fn check_one(guard: Guard, env: &GuardEnv, requester: &Requester<'_>) -> GuardOutcome {
    let policy = &env.policy;
    let lang = requester.lang;

    match guard {
        Guard::Maintenance => {
            if policy.maintenance && !policy.is_owner(requester.user_id) {
                let text = policy
                    .maintenance_message
                    .clone()
                    .unwrap_or_else(|| i18n::t(lang, "errors-maintenance"));
                return GuardOutcome::Reject(text);
            }
        }
        Guard::NotBanned => {
            if let Some(user) = requester.user.filter(|u| u.is_banned) {
                let reason = user
                    .ban_reason
                    .clone()
                    .unwrap_or_else(|| i18n::t(lang, "admin-ban-default-reason"));
                let mut args = FluentArgs::new();
                args.set("reason", reason);
                return GuardOutcome::Reject(i18n::t_args(lang, "errors-banned", &args));
            }
        }
        Guard::Admin => {
            if !policy.is_admin(requester.user_id) {
                return GuardOutcome::Reject(i18n::t(lang, "errors-not-admin"));
            }
        }
        Guard::Owner => {
            if !policy.is_owner(requester.user_id) {
                return GuardOutcome::Reject(i18n::t(lang, "errors-not-owner"));
            }
        }
        Guard::DailyQuota => {
            let (daily, _) = policy.limits.for_user(requester.is_vip());
            let decision = env
                .rate_window
                .check(requester.user_id, daily, policy.limits.window);
            if !decision.allowed {
                let mut args = FluentArgs::new();
                args.set("limit", daily);
                return GuardOutcome::Reject(i18n::t_args(lang, "errors-rate-limit", &args));
            }
            log::debug!("User {}: {} downloads left today", requester.user_id, decision.remaining);
        }
        Guard::UserConcurrency => {
            let (_, concurrent) = policy.limits.for_user(requester.is_vip());
            let current = env.registry.count_for_user(requester.user_id).await;
            if current >= concurrent {
                let mut args = FluentArgs::new();
                args.set("current", current);
                args.set("max", concurrent);
                return GuardOutcome::Reject(i18n::t_args(lang, "errors-concurrent-limit", &args));
            }
        }
        Guard::GlobalConcurrency => {
            if env.registry.global_count().await >= policy.limits.global_concurrent {
                return GuardOutcome::Reject(i18n::t(lang, "errors-global-limit"));
            }
        }
    }
    GuardOutcome::Proceed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::task::{generate_task_id, DownloadTask};

    fn limits(daily: usize, concurrent: usize, global: usize) -> Limits {
        Limits {
            daily,
            concurrent,
            vip_daily: daily * 10,
            vip_concurrent: concurrent * 10,
            global_concurrent: global,
            window: Duration::from_secs(86_400),
        }
    }

    fn env(maintenance: bool, limits: Limits) -> GuardEnv {
        GuardEnv {
            policy: Arc::new(AccessPolicy {
                maintenance,
                maintenance_message: None,
                owner_id: 1,
                admin_ids: vec![2],
                limits,
            }),
            rate_window: Arc::new(RateWindow::new()),
            registry: Arc::new(TaskRegistry::new()),
        }
    }

    fn user(id: i64) -> User {
        User {
            user_id: id,
            username: None,
            first_name: None,
            last_name: None,
            language: "en".into(),
            default_quality: "1080".into(),
            is_vip: false,
            vip_expiry: None,
            is_banned: false,
            ban_reason: None,
            total_downloads: 0,
            successful_downloads: 0,
            failed_downloads: 0,
            total_size: 0,
            created_at: None,
            last_active: None,
            daily_downloads: 0,
            daily_reset: None,
        }
    }

    #[tokio::test]
    async fn maintenance_lets_only_the_owner_through() {
        let env = env(true, limits(5, 1, 10));
        let lang = i18n::lang_from_code("en");
        let chain = GuardChain::user();

        let owner = Requester { user_id: 1, user: None, lang: &lang };
        assert_eq!(chain.check(&env, &owner).await, GuardOutcome::Proceed);

        let other = Requester { user_id: 5, user: None, lang: &lang };
        assert_eq!(
            chain.check(&env, &other).await,
            GuardOutcome::Reject(i18n::t(&lang, "errors-maintenance"))
        );
    }

    #[tokio::test]
    async fn banned_users_are_rejected_before_quota() {
        let env = env(false, limits(5, 1, 10));
        let lang = i18n::lang_from_code("en");
        let mut banned = user(5);
        banned.is_banned = true;
        banned.ban_reason = Some("spam".into());

        let outcome = GuardChain::download()
            .check(&env, &Requester { user_id: 5, user: Some(&banned), lang: &lang })
            .await;
        match outcome {
            GuardOutcome::Reject(text) => assert!(text.contains("spam")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(env.rate_window.remaining(5, 5, Duration::from_secs(86_400)), 5);
    }

    #[tokio::test]
    async fn roles() {
        let env = env(false, limits(5, 1, 10));
        let lang = i18n::lang_from_code("en");
        let req = |id| Requester { user_id: id, user: None, lang: &lang };

        assert!(GuardChain::admin().check(&env, &req(1)).await.is_proceed());
        assert!(GuardChain::admin().check(&env, &req(2)).await.is_proceed());
        assert!(!GuardChain::admin().check(&env, &req(3)).await.is_proceed());
        assert!(GuardChain::owner().check(&env, &req(1)).await.is_proceed());
        assert!(!GuardChain::owner().check(&env, &req(2)).await.is_proceed());
    }

    #[tokio::test]
    async fn concurrency_limits_count_active_tasks() {
        let env = env(false, limits(100, 1, 2));
        let lang = i18n::lang_from_code("en");
        let chain = GuardChain::download();

        env.registry
            .add(Arc::new(DownloadTask::new(generate_task_id(), 7, 7, 1, "https://vimeo.com/1")))
            .await
            .unwrap();
        let busy = chain.check(&env, &Requester { user_id: 7, user: None, lang: &lang }).await;
        assert!(!busy.is_proceed());

        assert!(chain
            .check(&env, &Requester { user_id: 8, user: None, lang: &lang })
            .await
            .is_proceed());

        env.registry
            .add(Arc::new(DownloadTask::new(generate_task_id(), 9, 9, 1, "https://vimeo.com/2")))
            .await
            .unwrap();
        assert_eq!(
            chain.check(&env, &Requester { user_id: 8, user: None, lang: &lang }).await,
            GuardOutcome::Reject(i18n::t(&lang, "errors-global-limit"))
        );
    }

    #[tokio::test]
    async fn vip_users_get_vip_limits() {
        let env = env(false, limits(1, 1, 100));
        let lang = i18n::lang_from_code("en");
        let mut vip = user(4);
        vip.is_vip = true;

        let chain = GuardChain::new(vec![Guard::DailyQuota]);
        for _ in 0..10 {
            assert!(chain
                .check(&env, &Requester { user_id: 4, user: Some(&vip), lang: &lang })
                .await
                .is_proceed());
        }
        assert!(!chain
            .check(&env, &Requester { user_id: 4, user: Some(&vip), lang: &lang })
            .await
            .is_proceed());
    }
}
