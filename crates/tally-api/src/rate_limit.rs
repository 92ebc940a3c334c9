use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::error::AppError;

/// Fixed-window limiter keyed by budget and user.
#[derive(Clone)]
pub struct SyncRateLimiter {
    state: Arc<Mutex<HashMap<String, RateWindow>>>,
    window: Duration,
    pull_limit: u32,
    push_limit: u32,
    metrics: Arc<RateLimitMetrics>,
}

/// Pushes write server state; pulls only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncBudget {
    Pull,
    Push,
}

#[derive(Default)]
struct RateLimitMetrics {
    pull_allowed: AtomicU64,
    pull_limited: AtomicU64,
    push_allowed: AtomicU64,
    push_limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub pull_allowed: u64,
    pub pull_limited: u64,
    pub push_allowed: u64,
    pub push_limited: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl SyncRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.pull_rate_limit_per_window,
            config.push_rate_limit_per_window,
        )
    }

    pub fn new(window: Duration, pull_limit: u32, push_limit: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            window,
            pull_limit,
            push_limit,
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    pub async fn check(&self, budget: SyncBudget, user_id: &str) -> Result<(), AppError> {
        let limit = match budget {
            SyncBudget::Pull => self.pull_limit,
            SyncBudget::Push => self.push_limit,
        };

        let key = format!("{}:{user_id}", budget.label());
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let entry = guard.entry(key).or_insert(RateWindow {
            started_at: now,
            count: 0,
        });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            self.counter(budget, false).fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                budget = budget.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("{} budget exhausted", budget.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        self.counter(budget, true).fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            pull_allowed: self.metrics.pull_allowed.load(Ordering::Relaxed),
            pull_limited: self.metrics.pull_limited.load(Ordering::Relaxed),
            push_allowed: self.metrics.push_allowed.load(Ordering::Relaxed),
            push_limited: self.metrics.push_limited.load(Ordering::Relaxed),
        }
    }

    fn counter(&self, budget: SyncBudget, allowed: bool) -> &AtomicU64 {
        match (budget, allowed) {
            (SyncBudget::Pull, true) => &self.metrics.pull_allowed,
            (SyncBudget::Pull, false) => &self.metrics.pull_limited,
            (SyncBudget::Push, true) => &self.metrics.push_allowed,
            (SyncBudget::Push, false) => &self.metrics.push_limited,
        }
    }
}

impl SyncBudget {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pull => "sync_pull",
            Self::Push => "sync_push",
        }
    }
}

/// Stable, non-reversible id for log lines.
pub fn user_fingerprint(user_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_blocks_after_limit() {
        let limiter = SyncRateLimiter::new(Duration::from_secs(60), 2, 5);

        limiter.check(SyncBudget::Pull, "user-a").await.unwrap();
        limiter.check(SyncBudget::Pull, "user-a").await.unwrap();

        let err = limiter.check(SyncBudget::Pull, "user-a").await.unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, secs) if secs >= 1));

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.pull_allowed, 2);
        assert_eq!(metrics.pull_limited, 1);
    }

    #[tokio::test]
    async fn budgets_and_users_are_independent() {
        let limiter = SyncRateLimiter::new(Duration::from_secs(60), 1, 1);

        limiter.check(SyncBudget::Pull, "user-a").await.unwrap();
        limiter.check(SyncBudget::Push, "user-a").await.unwrap();
        limiter.check(SyncBudget::Pull, "user-b").await.unwrap();
        assert!(limiter.check(SyncBudget::Push, "user-a").await.is_err());

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.push_allowed, 1);
        assert_eq!(metrics.push_limited, 1);
        assert_eq!(metrics.pull_allowed, 2);
    }
}
