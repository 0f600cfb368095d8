use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Responses with timestamps below this are assumed to be in seconds.
pub const SECONDS_THRESHOLD: i64 = 1_000_000_000_000;

fn debug_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        cfg!(debug_assertions)
            || std::env::var("AI_CONTEXT_DEBUG")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false)
    })
}

/// Developer tracing to stderr. Silent in release builds unless AI_CONTEXT_DEBUG=1.
pub fn debug_log(msg: &str) {
    if debug_enabled() {
        eprintln!("\x1b[1;33m[ai-context]\x1b[0m {}", msg);
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Chat sources report either seconds or milliseconds; always return milliseconds.
pub fn normalize_timestamp_ms(timestamp: i64) -> i64 {
    if timestamp < SECONDS_THRESHOLD {
        timestamp.saturating_mul(1000)
    } else {
        timestamp
    }
}

/// Forward slashes, no leading "./", no trailing or duplicate separators.
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if unified.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Truncate text for log lines without splitting a UTF-8 character.
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// Time source, injectable so retention pruning can be tested deterministically.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_ms()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use manual_clock::ManualClock;

#[cfg(any(test, feature = "test-support"))]
mod manual_clock {
    use super::Clock;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that only moves when told to.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        now: AtomicI64,
    }

    impl ManualClock {
        pub fn new(now_ms: i64) -> Self {
            Self {
                now: AtomicI64::new(now_ms),
            }
        }

        pub fn set(&self, now_ms: i64) {
            self.now.store(now_ms, Ordering::SeqCst);
        }

        pub fn advance(&self, delta_ms: i64) {
            self.now.fetch_add(delta_ms, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> i64 {
            self.now.load(Ordering::SeqCst)
        }
    }
}

/// Bounded retry with a linear delay: attempt N waits `base_delay * N` before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl BackoffPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Run `op` until it succeeds or attempts run out; returns the last error.
    pub fn retry<T, E, F>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts => {
                    debug_log(&format!(
                        "{} failed (attempt {}/{}): {}",
                        label, attempt, attempts, e
                    ));
                    thread::sleep(self.delay_after(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_timestamp_seconds_to_ms() {
        assert_eq!(normalize_timestamp_ms(1_700_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(1_700_000_000_000), 1_700_000_000_000);
        assert_eq!(normalize_timestamp_ms(0), 0);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("src\\x.ts"), "src/x.ts");
        assert_eq!(normalize_path("./src//x.ts"), "src/x.ts");
        assert_eq!(normalize_path("src/./a/../x.ts"), "src/x.ts");
        assert_eq!(normalize_path("/abs/path/"), "/abs/path");
        assert_eq!(normalize_path("../up/x.ts"), "../up/x.ts");
        assert_eq!(normalize_path(""), "");
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("héllo wörld", 5), "héllo...");
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_backoff_retries_until_success() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let mut calls = 0;
        let result: Result<u32, String> = policy.retry("op", |attempt| {
            calls += 1;
            if attempt < 3 {
                Err(format!("fail {}", attempt))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_backoff_gives_up_with_last_error() {
        let policy = BackoffPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        let result: Result<(), String> = policy.retry("op", |attempt| Err(format!("e{}", attempt)));
        assert_eq!(result, Err("e2".to_string()));
    }

    #[test]
    fn test_backoff_delay_is_linear() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(300));
        assert_eq!(BackoffPolicy::none().max_attempts, 1);
    }
}
