//! Day arithmetic for streak rules.
//!
//! Every streak boundary is a UTC calendar day. Two instants on the same UTC
//! date are zero days apart regardless of the hours between them; 23:59 and
//! 00:01 the next UTC day are one day apart.

use chrono::{Duration, NaiveDate};

use crate::types::Timestamp;

/// The UTC calendar date of an instant.
pub fn utc_day(ts: Timestamp) -> NaiveDate {
    ts.date_naive()
}

/// Whole UTC calendar days from `from` to `to` (negative when `to` is earlier).
pub fn days_between(from: Timestamp, to: Timestamp) -> i64 {
    (utc_day(to) - utc_day(from)).num_days()
}

/// Shift an instant forward by a whole number of days.
pub fn add_days(ts: Timestamp, days: i64) -> Timestamp {
    ts + Duration::days(days)
}

/// Whole hours from `now` until `deadline` (negative once passed).
pub fn hours_until(now: Timestamp, deadline: Timestamp) -> i64 {
    (deadline - now).num_hours()
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn same_day_is_zero() {
        assert_eq!(days_between(at(2026, 3, 1, 0, 5), at(2026, 3, 1, 23, 55)), 0);
    }

    #[test]
    fn midnight_crossing_is_one_day() {
        assert_eq!(days_between(at(2026, 3, 1, 23, 59), at(2026, 3, 2, 0, 1)), 1);
    }

    #[test]
    fn earlier_target_is_negative() {
        assert_eq!(days_between(at(2026, 3, 5, 12, 0), at(2026, 3, 2, 12, 0)), -3);
    }

    #[test]
    fn hours_until_counts_whole_hours() {
        assert_eq!(hours_until(at(2026, 3, 1, 10, 0), at(2026, 3, 2, 9, 30)), 23);
        assert_eq!(hours_until(at(2026, 3, 2, 10, 0), at(2026, 3, 2, 9, 0)), -1);
    }
}
