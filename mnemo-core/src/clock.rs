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

//! Time source abstraction.
//!
//! Every expiry decision in the store compares `u64` microsecond timestamps
//! against a [`Clock`]. Production code uses [`SystemClock`]; tests inject a
//! [`ManualClock`] and advance it explicitly, so TTL behavior is exercised
//! without any sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
pub type Micros = u64;

/// Source of "now" for every expiry check.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in microseconds since the Unix epoch.
    fn now_us(&self) -> Micros;
}

/// Wall-clock time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_us(&self) -> Micros {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests. Time moves only when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: Micros) -> Self {
        ManualClock {
            now_us: AtomicU64::new(start_us),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now_us
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, to_us: Micros) {
        self.now_us.store(to_us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> Micros {
        self.now_us.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_past_epoch() {
        let clock = SystemClock;
        // January 1, 2020 in microseconds
        assert!(clock.now_us() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000_000);
        assert_eq!(clock.now_us(), 1_000_000);

        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now_us(), 4_000_000);

        clock.set(10);
        assert_eq!(clock.now_us(), 10);
    }
}
