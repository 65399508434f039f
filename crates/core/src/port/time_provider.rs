// Time Provider Port (for testability)

use chrono::{DateTime, FixedOffset, Local, Utc};

/// Time provider interface (allows time travel in tests)
pub trait TimeProvider: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;

    /// Current instant as host-local wall clock time (time-of-day rules use this)
    fn now_local(&self) -> DateTime<FixedOffset> {
        self.now().with_timezone(&Local).fixed_offset()
    }
}

/// System time provider (production)
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use chrono::{Duration, Offset};
    use std::sync::Mutex;

    /// Settable clock with a fixed local offset
    ///
    /// `now_local` uses the configured offset instead of the host zone, so
    /// time-of-day rules resolve identically on every machine.
    pub struct MockTimeProvider {
        now: Mutex<DateTime<Utc>>,
        offset: FixedOffset,
    }

    impl MockTimeProvider {
        /// Clock whose local time is UTC
        pub fn new(now: DateTime<Utc>) -> Self {
            Self::with_offset(now, Utc.fix())
        }

        pub fn with_offset(now: DateTime<Utc>, offset: FixedOffset) -> Self {
            Self {
                now: Mutex::new(now),
                offset,
            }
        }

        /// Clock reading the given local wall time
        pub fn at_local(local: DateTime<FixedOffset>) -> Self {
            Self::with_offset(local.with_timezone(&Utc), *local.offset())
        }

        pub fn set(&self, now: DateTime<Utc>) {
            *self.now.lock().unwrap() = now;
        }

        pub fn advance_secs(&self, secs: i64) {
            *self.now.lock().unwrap() += Duration::seconds(secs);
        }
    }

    impl TimeProvider for MockTimeProvider {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        fn now_local(&self) -> DateTime<FixedOffset> {
            self.now().with_timezone(&self.offset)
        }
    }
}
