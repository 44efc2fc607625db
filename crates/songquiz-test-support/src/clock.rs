//! Test clock.

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use songquiz_core::clock::Clock;

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// The instant test sessions start at: 2026-01-15 10:00:00 UTC.
    #[must_use]
    pub fn start() -> Self {
        Self(
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
                .single()
                .unwrap_or_default(),
        )
    }

    /// A clock `seconds` after [`FixedClock::start`].
    #[must_use]
    pub fn after_secs(seconds: u32) -> Self {
        Self(Self::start().0 + TimeDelta::seconds(i64::from(seconds)))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
