//! Time sources for `now`-style default factories and catalog timestamps.

use std::fmt;
use time::OffsetDateTime;

/// A source of the current time.
///
/// The clock is injected through [`crate::Config`] so independent database
/// instances and tests control what `now` means.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current UTC time.
    fn now(&self) -> OffsetDateTime;
}

/// The operating system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(OffsetDateTime);

impl FixedClock {
    /// Creates a clock that always returns `at`.
    #[must_use]
    pub const fn new(at: OffsetDateTime) -> Self {
        Self(at)
    }

    /// Creates a clock frozen at a unix timestamp in seconds.
    ///
    /// Out-of-range timestamps fall back to the unix epoch.
    #[must_use]
    pub fn at_unix(seconds: i64) -> Self {
        Self(OffsetDateTime::from_unix_timestamp(seconds).unwrap_or(OffsetDateTime::UNIX_EPOCH))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = FixedClock::at_unix(1_700_000_000);
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().unix_timestamp(), 1_700_000_000);
    }
}
