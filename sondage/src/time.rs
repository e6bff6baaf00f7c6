// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable wall-clock access.
//!
//! Window assignment is driven entirely by "now", so anything that needs a
//! timestamp takes a [`TimeSource`] instead of calling
//! [`SystemTime::now`] directly. Production code uses the real clock;
//! tests install a [`fakes::ManualClock`] and steer rollover explicitly.

use std::{
    fmt,
    sync::Arc,
    time::SystemTime,
};

use chrono::{DateTime, Utc};

/// A source of wall-clock timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current wall-clock time.
    fn now(&self) -> SystemTime;
}

/// Shareable handle to a [`Clock`].
///
/// Cloning is cheap and clones observe the same underlying clock.
#[derive(Clone, Debug)]
pub struct TimeSource(Inner);

#[derive(Clone, Debug)]
enum Inner {
    System,
    Custom(Arc<dyn Clock>),
}

impl TimeSource {
    /// A time source backed by the operating system clock.
    pub fn system() -> Self {
        TimeSource(Inner::System)
    }

    /// A time source backed by a caller-provided [`Clock`].
    pub fn custom(clock: impl Clock + 'static) -> Self {
        TimeSource(Inner::Custom(Arc::new(clock)))
    }

    /// Returns the current time according to this source.
    pub fn now(&self) -> SystemTime {
        match &self.0 {
            Inner::System => SystemTime::now(),
            Inner::Custom(clock) => clock.now(),
        }
    }

    /// Returns the current time as a UTC calendar timestamp.
    pub fn now_utc(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.now())
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        TimeSource::system()
    }
}

/// Fake clocks for tests.
#[cfg(feature = "test-util")]
pub mod fakes {
    use std::{
        sync::{Arc, Mutex},
        time::{Duration, SystemTime},
    };

    use super::Clock;

    /// A clock that only moves when told to.
    ///
    /// Clones share the same instant, so a test can hand one copy to the
    /// aggregator and keep another to advance time across window boundaries.
    #[derive(Clone, Debug)]
    pub struct ManualClock {
        now: Arc<Mutex<SystemTime>>,
    }

    impl ManualClock {
        /// Creates a clock frozen at `now`.
        pub fn starting_at(now: SystemTime) -> Self {
            ManualClock {
                now: Arc::new(Mutex::new(now)),
            }
        }

        /// Moves the clock forward by `delta`.
        pub fn advance(&self, delta: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += delta;
        }

        /// Jumps the clock to an absolute instant.
        pub fn set(&self, to: SystemTime) {
            *self.now.lock().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> SystemTime {
            *self.now.lock().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use assert2::check;

    use super::{fakes::ManualClock, TimeSource};

    #[test]
    fn system_source_tracks_real_time() {
        let before = SystemTime::now();
        let observed = TimeSource::system().now();
        let after = SystemTime::now();
        check!(before <= observed);
        check!(observed <= after);
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::starting_at(UNIX_EPOCH);
        let source = TimeSource::custom(clock.clone());
        clock.advance(Duration::from_secs(90));
        check!(source.now() == UNIX_EPOCH + Duration::from_secs(90));
    }

    #[test]
    fn now_utc_formats_epoch() {
        let source = TimeSource::custom(ManualClock::starting_at(UNIX_EPOCH));
        check!(source.now_utc().format("%Y-%m-%d").to_string() == "1970-01-01");
    }
}
