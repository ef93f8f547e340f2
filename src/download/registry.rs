//! In-memory registry of active downloads.
//!
//! The registry owns the map structure only. Tasks are handed out as
//! `Arc<DownloadTask>` and their fields are updated by the holder without
//! going through the registry, so no registry lock is ever held while a task's
//! own lock is taken.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::core::error::{AppError, AppResult};
use crate::download::task::{DownloadTask, TaskStatus};

type CacheValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
struct TaskMaps {
    tasks: HashMap<String, Arc<DownloadTask>>,
    by_user: HashMap<i64, HashSet<String>>,
}

/// Point-in-time view of the registry counters.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStats {
    pub uptime: Duration,
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub active_tasks: usize,
    pub cache_size: usize,
    /// `"93.3%"`, or `"N/A"` before the first finished download
    pub success_rate: String,
}

/// Shared store of active tasks, a TTL cache and lifetime counters.
pub struct TaskRegistry {
    maps: RwLock<TaskMaps>,
    cache: Mutex<HashMap<String, (CacheValue, Instant)>>,
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    started_at: Instant,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            maps: RwLock::new(TaskMaps::default()),
            cache: Mutex::new(HashMap::new()),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    /// Registers a task under its ID and owner.
    ///
    /// Fails with [`AppError::DuplicateTask`] if the ID is already live.
    pub async fn add(&self, task: Arc<DownloadTask>) -> AppResult<()> {
        let mut maps = self.maps.write().await;
        if maps.tasks.contains_key(&task.id) {
            return Err(AppError::DuplicateTask(task.id.clone()));
        }
        maps.by_user.entry(task.user_id).or_default().insert(task.id.clone());
        log::debug!("Registered task {} for user {}", task.id, task.user_id);
        maps.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub async fn get(&self, task_id: &str) -> Option<Arc<DownloadTask>> {
        self.maps.read().await.tasks.get(task_id).cloned()
    }

    /// Removes a task from the map and the owner index. No-op if absent.
    pub async fn remove(&self, task_id: &str) -> Option<Arc<DownloadTask>> {
        let mut maps = self.maps.write().await;
        let task = maps.tasks.remove(task_id)?;
        if let Some(ids) = maps.by_user.get_mut(&task.user_id) {
            ids.remove(task_id);
            if ids.is_empty() {
                maps.by_user.remove(&task.user_id);
            }
        }
        log::debug!("Removed task {} for user {}", task_id, task.user_id);
        Some(task)
    }

    pub async fn count_for_user(&self, user_id: i64) -> usize {
        self.maps.read().await.by_user.get(&user_id).map_or(0, HashSet::len)
    }

    pub async fn list_for_user(&self, user_id: i64) -> Vec<Arc<DownloadTask>> {
        let maps = self.maps.read().await;
        maps.by_user
            .get(&user_id)
            .map(|ids| ids.iter().filter_map(|id| maps.tasks.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Flags every task of `user_id` as cancelled without removing any.
    ///
    /// Returns how many tasks were newly flagged.
    pub async fn cancel_all_for_user(&self, user_id: i64) -> usize {
        let tasks = self.list_for_user(user_id).await;
        let cancelled = tasks.iter().filter(|t| t.cancel()).count();
        if cancelled > 0 {
            log::info!("Cancelled {} task(s) for user {}", cancelled, user_id);
        }
        cancelled
    }

    /// Tasks still waiting for a quality pick after `max_age`.
    pub async fn stale_pending(&self, max_age: Duration) -> Vec<Arc<DownloadTask>> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(365));
        self.maps
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.created_at <= cutoff && t.status() == TaskStatus::Pending)
            .cloned()
            .collect()
    }

    pub async fn global_count(&self) -> usize {
        self.maps.read().await.tasks.len()
    }

    /// Returns the cached value if it is younger than `ttl` and of type `T`.
    ///
    /// Stale entries are evicted by this call.
    pub async fn cache_get<T>(&self, key: &str, ttl: Duration) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let mut cache = self.cache.lock().await;
        let (value, inserted) = cache.get(key)?;
        if inserted.elapsed() >= ttl {
            cache.remove(key);
            return None;
        }
        value.downcast_ref::<T>().cloned()
    }

    pub async fn cache_set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.cache
            .lock()
            .await
            .insert(key.into(), (Arc::new(value), Instant::now()));
    }

    /// Drops every cache entry older than `ttl`; returns how many were dropped.
    pub async fn purge_cache(&self, ttl: Duration) -> usize {
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, (_, inserted)| inserted.elapsed() < ttl);
        before - cache.len()
    }

    pub fn record_outcome(&self, success: bool) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn stats(&self) -> RegistryStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let success_rate = if total == 0 {
            "N/A".to_string()
        } else {
            format!("{:.1}%", successful as f64 / total as f64 * 100.0)
        };

        RegistryStats {
            uptime: self.started_at.elapsed(),
            total,
            successful,
            failed,
            active_tasks: self.global_count().await,
            cache_size: self.cache.lock().await.len(),
            success_rate,
        }
    }
}
