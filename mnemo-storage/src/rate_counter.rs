// Copyright 2025 Mnemo (https://github.com/mnemodb)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-window rate counters.
//!
//! A counter is created at 1 when its window opens and expires exactly
//! `window_len` after that moment; increments inside the window never move
//! the expiry (fixed window, not sliding). A subject can hold any number of
//! independently-named windows at once.

use dashmap::DashMap;
use mnemo_core::{Clock, MemoryError, MemoryResult, Micros};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u64,
    window_started_us: Micros,
    expires_at_us: Micros,
}

impl WindowCounter {
    fn open(now_us: Micros, window_len: Duration) -> Self {
        Self {
            count: 1,
            window_started_us: now_us,
            expires_at_us: now_us.saturating_add(window_len.as_micros() as u64),
        }
    }

    fn is_live(&self, now_us: Micros) -> bool {
        now_us < self.expires_at_us
    }
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Serialize)]
pub struct RateCounterStats {
    pub subjects: usize,
    pub windows: usize,
    pub expired_pending: usize,
}

/// Per-subject fixed-window counters.
///
/// Increments take the subject's map entry exclusively, so concurrent
/// callers each observe a distinct count: N racing increments of one
/// window always sum to N.
pub struct RateCounter {
    subjects: DashMap<String, HashMap<String, WindowCounter>>,
    clock: Arc<dyn Clock>,
}

impl RateCounter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            subjects: DashMap::new(),
            clock,
        }
    }

    /// Bump one window's counter and return the count after this call.
    ///
    /// An absent or expired window is (re)opened with count 1; a live one
    /// is incremented with its expiry untouched.
    pub fn increment(
        &self,
        subject: &str,
        window: &str,
        window_len: Duration,
    ) -> MemoryResult<u64> {
        if window_len.is_zero() {
            return Err(MemoryError::InvalidTtl);
        }
        let now = self.clock.now_us();
        let mut windows = self.subjects.entry(subject.to_string()).or_default();
        let counter = windows
            .entry(window.to_string())
            .and_modify(|c| {
                if c.is_live(now) {
                    c.count = c.count.saturating_add(1);
                } else {
                    *c = WindowCounter::open(now, window_len);
                }
            })
            .or_insert_with(|| WindowCounter::open(now, window_len));
        Ok(counter.count)
    }

    /// Count in the current window. 0 when absent or expired; never errors.
    pub fn peek(&self, subject: &str, window: &str) -> u64 {
        let now = self.clock.now_us();
        self.subjects
            .get(subject)
            .and_then(|windows| {
                windows
                    .get(window)
                    .filter(|c| c.is_live(now))
                    .map(|c| c.count)
            })
            .unwrap_or(0)
    }

    /// When the named window opened, if it is still live.
    pub fn window_started(&self, subject: &str, window: &str) -> Option<Micros> {
        let now = self.clock.now_us();
        self.subjects.get(subject).and_then(|windows| {
            windows
                .get(window)
                .filter(|c| c.is_live(now))
                .map(|c| c.window_started_us)
        })
    }

    /// Drop every window for one subject. Returns windows removed.
    pub fn delete_subject(&self, subject: &str) -> usize {
        let removed = self
            .subjects
            .remove(subject)
            .map(|(_, windows)| windows.len())
            .unwrap_or(0);
        if removed > 0 {
            debug!(subject, windows = removed, "rate counter erased subject");
        }
        removed
    }

    /// Drop every subject whose key starts with the prefix. Returns windows
    /// removed. Used for owner erasure when subjects are owner-scoped.
    pub fn delete_prefixed(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.subjects.retain(|subject, windows| {
            if subject.starts_with(prefix) {
                removed += windows.len();
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(prefix, windows = removed, "rate counter erased prefixed subjects");
        }
        removed
    }

    /// Reclaim expired windows and empty subjects. Reclamation only; peek
    /// already reports expired windows as 0.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_us();
        let mut reclaimed = 0;
        self.subjects.retain(|_, windows| {
            let before = windows.len();
            windows.retain(|_, counter| counter.is_live(now));
            reclaimed += before - windows.len();
            !windows.is_empty()
        });
        reclaimed
    }

    pub fn stats(&self) -> RateCounterStats {
        let now = self.clock.now_us();
        let mut windows = 0;
        let mut expired_pending = 0;
        for subject in self.subjects.iter() {
            for counter in subject.values() {
                windows += 1;
                if !counter.is_live(now) {
                    expired_pending += 1;
                }
            }
        }
        RateCounterStats {
            subjects: self.subjects.len(),
            windows,
            expired_pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mnemo_core::ManualClock;
    use std::thread;

    const MINUTE: Duration = Duration::from_secs(60);

    fn test_counter() -> (RateCounter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let counter = RateCounter::new(clock.clone());
        (counter, clock)
    }

    #[test]
    fn test_increment_counts_up() {
        let (counter, _clock) = test_counter();
        assert_eq!(counter.increment("alice", "per-minute", MINUTE).unwrap(), 1);
        assert_eq!(counter.increment("alice", "per-minute", MINUTE).unwrap(), 2);
        assert_eq!(counter.increment("alice", "per-minute", MINUTE).unwrap(), 3);
        assert_eq!(counter.peek("alice", "per-minute"), 3);
    }

    #[test]
    fn test_zero_window_rejected() {
        let (counter, _clock) = test_counter();
        let err = counter
            .increment("alice", "per-minute", Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, MemoryError::InvalidTtl);
        assert_eq!(counter.peek("alice", "per-minute"), 0);
    }

    #[test]
    fn test_window_expiry_resets_count() {
        let (counter, clock) = test_counter();
        for _ in 0..3 {
            counter.increment("alice", "per-minute", MINUTE).unwrap();
        }

        clock.advance(Duration::from_secs(61));
        assert_eq!(counter.peek("alice", "per-minute"), 0);
        assert_eq!(counter.increment("alice", "per-minute", MINUTE).unwrap(), 1);
    }

    #[test]
    fn test_increment_never_extends_the_window() {
        let (counter, clock) = test_counter();
        let start = clock.now_us();

        counter.increment("alice", "per-minute", MINUTE).unwrap();
        clock.advance(Duration::from_secs(40));
        assert_eq!(counter.increment("alice", "per-minute", MINUTE).unwrap(), 2);
        assert_eq!(counter.window_started("alice", "per-minute"), Some(start));

        // 61s after the window opened it is gone, despite the recent bump.
        clock.advance(Duration::from_secs(21));
        assert_eq!(counter.peek("alice", "per-minute"), 0);
    }

    #[test]
    fn test_windows_are_independent() {
        let (counter, _clock) = test_counter();
        counter.increment("alice", "per-minute", MINUTE).unwrap();
        counter.increment("alice", "per-minute", MINUTE).unwrap();
        counter
            .increment("alice", "per-hour", Duration::from_secs(3600))
            .unwrap();
        counter.increment("bob", "per-minute", MINUTE).unwrap();

        assert_eq!(counter.peek("alice", "per-minute"), 2);
        assert_eq!(counter.peek("alice", "per-hour"), 1);
        assert_eq!(counter.peek("bob", "per-minute"), 1);
    }

    #[test]
    fn test_concurrent_increments_are_gap_free() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let counter = Arc::new(RateCounter::new(clock));
        let threads: u64 = 8;
        let per_thread: u64 = 100;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        counter.increment("alice", "per-minute", MINUTE).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.peek("alice", "per-minute"), threads * per_thread);
    }

    #[test]
    fn test_purge_and_subject_erasure() {
        let (counter, clock) = test_counter();
        counter.increment("alice", "per-minute", MINUTE).unwrap();
        counter
            .increment("alice", "per-hour", Duration::from_secs(3600))
            .unwrap();
        counter.increment("bob", "per-minute", MINUTE).unwrap();

        clock.advance(Duration::from_secs(61));
        assert_eq!(counter.purge_expired(), 2);
        assert_eq!(counter.stats().subjects, 1);

        assert_eq!(counter.delete_subject("alice"), 1);
        assert_eq!(counter.stats().subjects, 0);
    }

    #[test]
    fn test_delete_prefixed_scopes_to_owner() {
        let (counter, _clock) = test_counter();
        counter.increment("alice/chat", "per-minute", MINUTE).unwrap();
        counter.increment("alice/search", "per-minute", MINUTE).unwrap();
        counter.increment("alicia/chat", "per-minute", MINUTE).unwrap();

        assert_eq!(counter.delete_prefixed("alice/"), 2);
        assert_eq!(counter.peek("alice/chat", "per-minute"), 0);
        assert_eq!(counter.peek("alicia/chat", "per-minute"), 1);
    }
}
