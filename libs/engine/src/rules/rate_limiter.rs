//! Per-rule sliding-window rate limiter enforcing `maxReplaysPerHour`.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use time::{Duration, OffsetDateTime};

const WINDOW: Duration = Duration::hours(1);

pub struct ReplayRateLimiter {
    windows: DashMap<i64, Mutex<VecDeque<OffsetDateTime>>>,
}

impl ReplayRateLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Returns `true` and records the attempt if `rule_id` still has budget
    /// within the trailing hour; returns `false` without recording anything
    /// otherwise.
    pub fn try_acquire(&self, rule_id: i64, max_per_hour: u32, now: OffsetDateTime) -> bool {
        let entry = self.windows.entry(rule_id).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut window = entry.lock().expect("rate limiter lock poisoned");
        while let Some(&oldest) = window.front() {
            if now - oldest > WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        if window.len() as u32 >= max_per_hour {
            return false;
        }
        window.push_back(now);
        true
    }
}

impl Default for ReplayRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_the_cap_then_blocks() {
        let limiter = ReplayRateLimiter::new();
        let now = OffsetDateTime::now_utc();
        assert!(limiter.try_acquire(1, 2, now));
        assert!(limiter.try_acquire(1, 2, now));
        assert!(!limiter.try_acquire(1, 2, now));
    }

    #[test]
    fn window_expires_after_an_hour() {
        let limiter = ReplayRateLimiter::new();
        let start = OffsetDateTime::now_utc();
        assert!(limiter.try_acquire(1, 1, start));
        assert!(!limiter.try_acquire(1, 1, start));
        let later = start + Duration::hours(1) + Duration::seconds(1);
        assert!(limiter.try_acquire(1, 1, later));
    }

    #[test]
    fn separate_rules_have_independent_budgets() {
        let limiter = ReplayRateLimiter::new();
        let now = OffsetDateTime::now_utc();
        assert!(limiter.try_acquire(1, 1, now));
        assert!(limiter.try_acquire(2, 1, now));
    }
}
