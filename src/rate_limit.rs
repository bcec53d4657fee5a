//! Fixed-window request counters keyed by client address

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::config::Config;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug)]
struct Counters {
    windows: HashMap<String, Window>,
    last_pruned: Instant,
}

/// One named limiter, e.g. `login`
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    window: Duration,
    max: u32,
    message: &'static str,
    counters: Mutex<Counters>,
}

impl RateLimiter {
    pub fn new(name: &'static str, window: Duration, max: u32, message: &'static str) -> Self {
        Self {
            name,
            window,
            max,
            message,
            counters: Mutex::new(Counters {
                windows: HashMap::new(),
                last_pruned: Instant::now(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Count one request for `key`
    pub fn check(&self, key: &str) -> Result<(), ApiError> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> Result<(), ApiError> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // Expired windows are dropped at most once per window length
        if now.saturating_duration_since(counters.last_pruned) >= self.window {
            let window = self.window;
            counters
                .windows
                .retain(|_, w| now.saturating_duration_since(w.started) < window);
            counters.last_pruned = now;
        }

        let entry = counters.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max {
            let elapsed = now.saturating_duration_since(entry.started);
            let retry_after = self.window.saturating_sub(elapsed).as_secs().max(1);
            warn!(limiter = self.name, key, "rate limit exceeded");
            return Err(ApiError::TooManyRequests {
                message: self.message.to_string(),
                retry_after_secs: retry_after,
            });
        }

        entry.count += 1;
        Ok(())
    }
}

/// Selects one of the [`RateLimits`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Global,
    Login,
    Register,
    Refresh,
    Llm,
    Chat,
}

/// All limiters used by the routes
#[derive(Debug)]
pub struct RateLimits {
    pub global: RateLimiter,
    pub login: RateLimiter,
    pub register: RateLimiter,
    pub refresh: RateLimiter,
    pub llm: RateLimiter,
    pub chat: RateLimiter,
}

const MINUTE: Duration = Duration::from_secs(60);

impl RateLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            global: RateLimiter::new(
                "global",
                Duration::from_millis(config.rate_limit_window_ms),
                config.rate_limit_max_requests,
                "Too many requests from this IP, please try again later.",
            ),
            login: RateLimiter::new(
                "login",
                15 * MINUTE,
                5,
                "Too many login attempts, please try again later",
            ),
            register: RateLimiter::new(
                "register",
                60 * MINUTE,
                10,
                "Too many registration attempts, please try again later",
            ),
            refresh: RateLimiter::new(
                "refresh",
                15 * MINUTE,
                20,
                "Too many token refresh attempts, please try again later",
            ),
            llm: RateLimiter::new(
                "llm",
                15 * MINUTE,
                100,
                "Too many LLM requests, please try again later",
            ),
            chat: RateLimiter::new(
                "chat",
                MINUTE,
                20,
                "Too many chat messages, please slow down",
            ),
        }
    }

    pub fn get(&self, limit: Limit) -> &RateLimiter {
        match limit {
            Limit::Global => &self.global,
            Limit::Login => &self.login,
            Limit::Register => &self.register,
            Limit::Refresh => &self.refresh,
            Limit::Llm => &self.llm,
            Limit::Chat => &self.chat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_allows_up_to_max_then_rejects() {
        let limiter = RateLimiter::new("test", MINUTE, 3, "slow down");
        for _ in 0..3 {
            assert_ok!(limiter.check("1.2.3.4"));
        }
        match limiter.check("1.2.3.4") {
            Err(ApiError::TooManyRequests {
                message,
                retry_after_secs,
            }) => {
                assert_eq!(message, "slow down");
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // Other clients are unaffected
        assert_ok!(limiter.check("5.6.7.8"));
    }

    #[test]
    fn test_window_resets() {
        let limiter = RateLimiter::new("test", Duration::from_secs(10), 1, "slow down");
        let start = Instant::now();
        assert_ok!(limiter.check_at("k", start));
        assert_err!(limiter.check_at("k", start + Duration::from_secs(5)));
        assert_ok!(limiter.check_at("k", start + Duration::from_secs(10)));
    }

    #[test]
    fn test_expired_windows_are_pruned_once_per_window() {
        let limiter = RateLimiter::new("test", Duration::from_secs(10), 5, "slow down");
        let start = Instant::now();
        for i in 0..50 {
            assert_ok!(limiter.check_at(&format!("10.0.0.{}", i), start));
        }

        assert_ok!(limiter.check_at("late", start + Duration::from_secs(5)));
        assert_eq!(limiter.counters.lock().unwrap().windows.len(), 51);

        assert_ok!(limiter.check_at("later", start + Duration::from_secs(11)));
        let counters = limiter.counters.lock().unwrap();
        assert_eq!(counters.windows.len(), 2);
        assert!(counters.windows.contains_key("late"));
    }

    #[test]
    fn test_limits_from_config() {
        let config = Config::from_vars(vec![
            ("DATABASE_URL", "memory://"),
            ("JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("RATE_LIMIT_MAX_REQUESTS", "2"),
        ])
        .unwrap();
        let limits = RateLimits::from_config(&config);
        assert_eq!(limits.global.max, 2);
        assert_eq!(limits.login.max, 5);
        assert_eq!(limits.chat.window, MINUTE);
        assert_eq!(limits.get(Limit::Login).name(), "login");
    }
}
