//! The single source of "now" for business logic.
//!
//! Sync audit rows, scheduler fire times, stop-list intervals and document
//! timestamps are all cross-referenced in one operational zone. Calling
//! `Utc::now()` (or worse, host-local now) from business code breaks that
//! cross-referencing, so everything goes through a shared [`ProjectClock`].

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy)]
pub struct ProjectClock {
    tz: Tz,
}

impl ProjectClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// Current instant in the project zone.
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    /// Current instant as UTC — for columns stored as `timestamptz`.
    pub fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Today's date in the project zone (NOT the host zone).
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

impl Default for ProjectClock {
    fn default() -> Self {
        Self::new(chrono_tz::Europe::Kaliningrad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn project_now_matches_utc_instant() {
        let clock = ProjectClock::default();
        let local = clock.now();
        let utc = clock.now_utc();
        // Same instant, different zone: the difference is sub-second.
        let delta = (utc - local.with_timezone(&Utc)).num_seconds().abs();
        assert!(delta <= 1, "clock readings drifted: {delta}s");
    }

    #[test]
    fn kaliningrad_is_utc_plus_two() {
        let clock = ProjectClock::default();
        let local = clock.now();
        let utc = clock.now_utc();
        let local_hour = local.hour() as i64;
        let utc_hour = utc.hour() as i64;
        assert_eq!((local_hour - utc_hour).rem_euclid(24), 2);
    }
}
