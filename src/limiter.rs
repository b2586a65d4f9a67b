use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::config::LimitsConfig;

/// Per-connection, per-event-kind rate limiter.
///
/// Each WebSocket session task owns one of these; the counters disappear
/// with the connection, so no shared state and no cleanup pass is
/// needed. Fixed window: a kind's counter resets once its window has
/// elapsed.
#[derive(Debug)]
pub struct EventRateLimiter {
    windows: HashMap<&'static str, (u32, Instant)>,
    max_events: u32,
    window: Duration,
}

impl EventRateLimiter {
    pub fn new(max_events: u32, window: Duration) -> Self {
        Self { windows: HashMap::new(), max_events, window }
    }

    pub fn from_config(config: &LimitsConfig) -> Self {
        Self::new(config.events_per_window, Duration::from_secs(config.window_seconds))
    }

    /// Returns true if an event of `kind` is allowed right now.
    pub fn check(&mut self, kind: &'static str) -> bool {
        let now = Instant::now();
        match self.windows.get_mut(kind) {
            Some((count, window_start)) => {
                if now.duration_since(*window_start) >= self.window {
                    *count = 1;
                    *window_start = now;
                    true
                } else if *count >= self.max_events {
                    false
                } else {
                    *count += 1;
                    true
                }
            }
            None => {
                self.windows.insert(kind, (1, now));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_normal_traffic() {
        let mut limiter = EventRateLimiter::new(5, Duration::from_secs(1));
        for _ in 0..5 {
            assert!(limiter.check("submit-vote"));
        }
        assert!(!limiter.check("submit-vote"));
    }

    #[test]
    fn kinds_have_separate_windows() {
        let mut limiter = EventRateLimiter::new(2, Duration::from_secs(1));
        assert!(limiter.check("submit-vote"));
        assert!(limiter.check("submit-vote"));
        assert!(!limiter.check("submit-vote"));

        assert!(limiter.check("start-voting"));
        assert!(limiter.check("start-voting"));
        assert!(!limiter.check("start-voting"));
    }

    #[test]
    fn window_resets_after_elapse() {
        let mut limiter = EventRateLimiter::new(2, Duration::from_millis(10));
        assert!(limiter.check("submit-vote"));
        assert!(limiter.check("submit-vote"));
        assert!(!limiter.check("submit-vote"));

        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("submit-vote"));
    }
}
