use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Sliding-window quota counter keyed by user ID.
///
/// Every allowed action leaves one timestamp in the user's sequence. Timestamps
/// older than the window are purged lazily, on the next check for that user,
/// so the sequence never grows beyond `limit` entries.
///
/// Each user has their own lock: two checks for the same user are serialized,
/// checks for different users only share the short map lookup.
#[derive(Clone, Default)]
pub struct RateWindow {
    users: Arc<Mutex<HashMap<i64, Arc<Mutex<VecDeque<Instant>>>>>>,
}

/// Result of a single quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave the map or a sequence half-updated
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateWindow {
    /// Creates an empty rate window.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use vidgrab::core::rate_limiter::RateWindow;
    /// use std::time::Duration;
    ///
    /// let window = RateWindow::new();
    /// let decision = window.check(42, 5, Duration::from_secs(86_400));
    /// assert!(decision.allowed);
    /// ```
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, user_id: i64) -> Arc<Mutex<VecDeque<Instant>>> {
        let mut users = lock(&self.users);
        Arc::clone(users.entry(user_id).or_default())
    }

    /// Checks whether `user_id` may perform one more action and records it if so.
    pub fn check(&self, user_id: i64, limit: usize, window: Duration) -> RateDecision {
        self.check_at(user_id, limit, window, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, user_id: i64, limit: usize, window: Duration, now: Instant) -> RateDecision {
        let entry = self.entry(user_id);
        let mut stamps = lock(&entry);

        purge(&mut stamps, window, now);

        let count = stamps.len();
        if count < limit {
            stamps.push_back(now);
            RateDecision {
                allowed: true,
                remaining: limit - count - 1,
            }
        } else {
            RateDecision {
                allowed: false,
                remaining: 0,
            }
        }
    }

    /// Remaining quota without recording an action.
    pub fn remaining(&self, user_id: i64, limit: usize, window: Duration) -> usize {
        let entry = self.entry(user_id);
        let mut stamps = lock(&entry);
        purge(&mut stamps, window, Instant::now());
        limit.saturating_sub(stamps.len())
    }

    /// Drops users whose sequences are empty after purging.
    ///
    /// Entries a check is still holding are kept, so its timestamp lands in the map.
    pub fn cleanup(&self, window: Duration) -> usize {
        let now = Instant::now();
        let mut users = lock(&self.users);
        let before = users.len();
        users.retain(|_, entry| {
            if Arc::strong_count(entry) > 1 {
                return true;
            }
            let mut stamps = lock(entry);
            purge(&mut stamps, window, now);
            !stamps.is_empty()
        });
        before - users.len()
    }

    /// Number of users currently tracked.
    pub fn tracked_users(&self) -> usize {
        lock(&self.users).len()
    }

    /// Spawns a task that periodically drops idle users.
    pub fn spawn_cleanup_task(self: Arc<Self>, window: Duration, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = self.cleanup(window);
                if removed > 0 {
                    log::debug!("Rate window cleanup removed {} idle users", removed);
                }
            }
        });
    }
}

fn purge(stamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    // Timestamps are appended in order, so expired ones sit at the front
    while let Some(front) = stamps.front() {
        if now.saturating_duration_since(*front) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}
