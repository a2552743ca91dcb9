//! Per-key attempt limiter with sliding windows and temporary blocks.
//!
//! Used for sensitive, repeatable actions such as public lead submissions.
//! Unlike a token bucket, exceeding the limit escalates to a fixed-length
//! block during which every attempt is refused.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            block_duration: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AttemptState {
    count: u32,
    first_attempt: Instant,
    blocked_until: Option<Instant>,
}

impl AttemptState {
    fn fresh(now: Instant) -> Self {
        Self {
            count: 0,
            first_attempt: now,
            blocked_until: None,
        }
    }
}

struct Entries {
    keys: HashMap<String, AttemptState>,
    last_sweep: Instant,
}

/// Thread-safe keyed limiter. The lock is never held across `.await`.
///
/// Keys whose window and block have both run out are dropped, lazily on
/// access and in a periodic sweep, so the map only holds live keys.
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Mutex<Entries>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(Entries {
                keys: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    /// Whether an attempt for `key` may proceed. Records nothing.
    pub fn check_limit(&self, key: &str) -> bool {
        self.check_limit_at(key, Instant::now())
    }

    /// Checks and, when allowed, counts one attempt for `key`.
    pub fn record_attempt(&self, key: &str) -> bool {
        self.record_attempt_at(key, Instant::now())
    }

    pub fn is_blocked(&self, key: &str) -> bool {
        self.is_blocked_at(key, Instant::now())
    }

    /// Time left on an active block, if any.
    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        self.retry_after_at(key, Instant::now())
    }

    /// Clears all state for `key`, e.g. after a successful authentication.
    pub fn reset(&self, key: &str) {
        self.lock().keys.remove(key);
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.lock().keys.get(key).map(|s| s.count).unwrap_or(0)
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn check_limit_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.lock();
        let Some(state) = entries.keys.get(key) else {
            return true;
        };
        if self.is_expired(state, now) {
            entries.keys.remove(key);
            return true;
        }
        state.blocked_until.is_none() && state.count < self.config.max_attempts
    }

    pub fn record_attempt_at(&self, key: &str, now: Instant) -> bool {
        let mut entries = self.lock();
        if now.saturating_duration_since(entries.last_sweep) >= self.config.window {
            self.sweep(&mut entries, now);
        }

        let state = entries
            .keys
            .entry(key.to_string())
            .or_insert_with(|| AttemptState::fresh(now));
        if self.is_expired(state, now) {
            *state = AttemptState::fresh(now);
        }

        if state.blocked_until.is_some() {
            return false;
        }

        if state.count == 0 {
            state.first_attempt = now;
        }
        state.count += 1;
        if state.count >= self.config.max_attempts {
            state.blocked_until = Some(now + self.config.block_duration);
            warn!("Rate limit reached for key {key}; blocked");
        }
        true
    }

    pub fn is_blocked_at(&self, key: &str, now: Instant) -> bool {
        self.retry_after_at(key, now).is_some()
    }

    pub fn retry_after_at(&self, key: &str, now: Instant) -> Option<Duration> {
        let mut entries = self.lock();
        let state = entries.keys.get(key)?;
        if self.is_expired(state, now) {
            entries.keys.remove(key);
            return None;
        }
        state.blocked_until.map(|until| until.saturating_duration_since(now))
    }

    /// Drops every key whose window and block have run out. Returns how many.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        self.sweep(&mut entries, now)
    }

    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    fn sweep(&self, entries: &mut Entries, now: Instant) -> usize {
        let before = entries.keys.len();
        entries.keys.retain(|_, state| !self.is_expired(state, now));
        entries.last_sweep = now;
        before - entries.keys.len()
    }

    /// A block that has ended, or an unblocked window that has elapsed.
    fn is_expired(&self, state: &AttemptState, now: Instant) -> bool {
        match state.blocked_until {
            Some(until) => now >= until,
            None => now.saturating_duration_since(state.first_attempt) >= self.config.window,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        // A poisoned map only holds counters; keep serving with its contents.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Periodically evicts expired keys from a shared limiter.
pub fn spawn_sweeper(limiter: Arc<RateLimiter>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            let evicted = limiter.sweep_expired();
            if evicted > 0 {
                debug!("Rate limiter evicted {evicted} expired key(s)");
            }
        }
    });
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn test_unknown_key_is_allowed() {
        let rl = limiter();
        assert!(rl.check_limit("1.2.3.4"));
        assert!(!rl.is_blocked("1.2.3.4"));
        assert_eq!(rl.attempts("1.2.3.4"), 0);
    }

    #[test]
    fn test_check_limit_does_not_record() {
        let rl = limiter();
        let now = Instant::now();
        for _ in 0..10 {
            assert!(rl.check_limit_at("k", now));
        }
        assert_eq!(rl.attempts("k"), 0);
    }

    #[test]
    fn test_sixth_attempt_in_window_is_refused_and_blocks() {
        let rl = limiter();
        let start = Instant::now();
        for i in 0..5 {
            assert!(rl.record_attempt_at("k", start + MINUTE * i), "attempt {i}");
        }
        assert!(!rl.record_attempt_at("k", start + MINUTE * 5));
        assert!(rl.is_blocked_at("k", start + MINUTE * 5));
        assert!(!rl.check_limit_at("k", start + MINUTE * 6));
    }

    #[test]
    fn test_block_expires_and_counter_resets() {
        let rl = limiter();
        let start = Instant::now();
        for _ in 0..6 {
            rl.record_attempt_at("k", start);
        }
        assert!(rl.is_blocked_at("k", start));

        let after_block = start + Duration::from_secs(30 * 60);
        assert!(rl.check_limit_at("k", after_block));
        assert_eq!(rl.attempts("k"), 0);
        assert!(!rl.is_blocked_at("k", after_block));
    }

    #[test]
    fn test_window_elapsing_resets_counter() {
        let rl = limiter();
        let start = Instant::now();
        for _ in 0..4 {
            assert!(rl.record_attempt_at("k", start));
        }
        let later = start + MINUTE * 16;
        assert!(rl.record_attempt_at("k", later));
        assert_eq!(rl.attempts("k"), 1);
    }

    #[test]
    fn test_retry_after_reports_remaining_block() {
        let rl = limiter();
        let start = Instant::now();
        for _ in 0..5 {
            rl.record_attempt_at("k", start);
        }
        let remaining = rl.retry_after_at("k", start + MINUTE * 10).unwrap();
        assert_eq!(remaining, MINUTE * 20);
    }

    #[test]
    fn test_reset_clears_block() {
        let rl = limiter();
        let now = Instant::now();
        for _ in 0..6 {
            rl.record_attempt_at("k", now);
        }
        rl.reset("k");
        assert!(rl.check_limit_at("k", now));
        assert!(!rl.is_blocked_at("k", now));
    }

    #[test]
    fn test_expired_keys_are_evicted() {
        let rl = limiter();
        let start = Instant::now();
        for i in 0..10_000 {
            rl.record_attempt_at(&format!("10.0.{}.{}", i / 256, i % 256), start);
        }
        assert_eq!(rl.tracked_keys(), 10_000);

        let next_day = start + Duration::from_secs(24 * 60 * 60);
        assert!(rl.record_attempt_at("192.0.2.1", next_day));
        assert_eq!(rl.tracked_keys(), 1);
    }

    #[test]
    fn test_sweep_keeps_live_windows_and_blocks() {
        let rl = limiter();
        let start = Instant::now();
        rl.record_attempt_at("stale", start);
        for _ in 0..5 {
            rl.record_attempt_at("blocked", start);
        }
        rl.record_attempt_at("recent", start + MINUTE * 10);

        let evicted = rl.sweep_expired_at(start + MINUTE * 20);
        assert_eq!(evicted, 1);
        assert_eq!(rl.tracked_keys(), 2);
        assert!(rl.is_blocked_at("blocked", start + MINUTE * 20));
        assert_eq!(rl.attempts("recent"), 1);
    }

    #[test]
    fn test_keys_are_independent() {
        let rl = limiter();
        let now = Instant::now();
        for _ in 0..6 {
            rl.record_attempt_at("a", now);
        }
        assert!(rl.check_limit_at("b", now));
        assert!(rl.record_attempt_at("b", now));
    }
}
