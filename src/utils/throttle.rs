//! Rate limiting for repeated diagnostics
//!
//! The retry loop can hit the same signaling failure every poll interval for
//! as long as an endpoint is down. Only the first occurrence per window is
//! logged; the rest are counted and reported with the next emitted line.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct Entry {
    last_logged: Instant,
    suppressed: u64,
}

/// Per-key diagnostic throttle
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Decide whether a diagnostic for `key` should be emitted now
    ///
    /// Returns `Some(n)` when it should, where `n` is the number of
    /// occurrences swallowed since the last emitted one. Returns `None`
    /// while the key is inside its window.
    pub fn check(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last_logged) < self.interval => {
                entry.suppressed += 1;
                None
            }
            Some(entry) => {
                let suppressed = entry.suppressed;
                entry.last_logged = now;
                entry.suppressed = 0;
                Some(suppressed)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last_logged: now,
                        suppressed: 0,
                    },
                );
                Some(0)
            }
        }
    }

    /// Forget every key, e.g. after a successful exchange
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(30)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_and_suppressed_count() {
        let throttler = LogThrottler::new(Duration::from_secs(10));

        assert_eq!(throttler.check("status:503"), Some(0));
        assert_eq!(throttler.check("status:503"), None);
        assert_eq!(throttler.check("status:503"), None);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(throttler.check("status:503"), Some(2));
        assert_eq!(throttler.check("status:503"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);

        assert_eq!(throttler.check("status:500"), Some(0));
        assert_eq!(throttler.check("status:405"), Some(0));
        assert_eq!(throttler.check("status:500"), None);
        assert_eq!(throttler.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let throttler = LogThrottler::default();

        assert_eq!(throttler.check("network"), Some(0));
        assert_eq!(throttler.check("network"), None);

        throttler.clear_all();
        assert!(throttler.is_empty());
        assert_eq!(throttler.check("network"), Some(0));
    }
}
