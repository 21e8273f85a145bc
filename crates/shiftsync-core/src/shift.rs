//! Shift definitions and shift-day resolution.
//!
//! A punch timestamp alone does not say which working day it belongs to:
//! overnight shifts straddle midnight, so a 03:00 punch can belong to the
//! previous calendar date. [`Shift::shift_day`] computes that attribution
//! as a pure function of the timestamp and the shift boundaries -- it never
//! touches the ledger and never depends on insertion order.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::EventError;

/// A named shift with time-of-day boundaries.
///
/// `end_time < start_time` denotes an overnight shift (e.g. 22:00 -> 06:00).
/// Shifts are managed by the external directory sync and are read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub id: i64,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Shift {
    /// Whether this shift crosses midnight.
    pub fn is_overnight(&self) -> bool {
        self.end_time < self.start_time
    }

    /// Calendar day a punch is attributed to for shift-boundary purposes.
    ///
    /// Day shifts attribute every punch to its own date. For overnight
    /// shifts, a punch at or after `start_time` is on the late side of
    /// midnight and belongs to its own date; anything earlier is the
    /// morning tail of the previous day's shift.
    pub fn shift_day(&self, timestamp: NaiveDateTime) -> NaiveDate {
        if self.is_overnight() && timestamp.time() < self.start_time {
            timestamp.date() - Duration::days(1)
        } else {
            timestamp.date()
        }
    }
}

/// A user known to the directory, with an optional assigned shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub shift: Option<Shift>,
}

/// Parse a stored time-of-day string.
///
/// Accepts `HH:MM:SS` with an `HH:MM` fallback (both appear in directory
/// exports). Anything else is [`EventError::InvalidTimeFormat`].
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, EventError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| EventError::InvalidTimeFormat {
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shift(start: &str, end: &str) -> Shift {
        Shift {
            id: 1,
            name: "test".to_string(),
            start_time: parse_time_of_day(start).unwrap(),
            end_time: parse_time_of_day(end).unwrap(),
        }
    }

    fn ts(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").unwrap()
    }

    #[test]
    fn day_shift_uses_punch_date() {
        let day = shift("06:00:00", "14:00:00");
        assert_eq!(
            day.shift_day(ts("2024-05-01T05:30:00")),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
        assert_eq!(
            day.shift_day(ts("2024-05-01T23:59:59")),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn overnight_shift_late_side_keeps_own_date() {
        let night = shift("22:00:00", "06:00:00");
        assert_eq!(
            night.shift_day(ts("2024-05-01T23:00:00")),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
        assert_eq!(
            night.shift_day(ts("2024-05-02T22:00:00")),
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
        );
    }

    #[test]
    fn overnight_shift_early_side_rolls_back_a_day() {
        let night = shift("22:00:00", "06:00:00");
        assert_eq!(
            night.shift_day(ts("2024-05-02T03:00:00")),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn overnight_boundary_is_exact() {
        let night = shift("22:00:00", "06:00:00");
        // Exactly at start_time: late side, own date.
        assert_eq!(
            night.shift_day(ts("2024-05-02T22:00:00")),
            NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
        );
        // One second before start_time: early side, previous date.
        assert_eq!(
            night.shift_day(ts("2024-05-02T21:59:59")),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn equal_boundaries_count_as_day_shift() {
        let s = shift("08:00:00", "08:00:00");
        assert!(!s.is_overnight());
        assert_eq!(
            s.shift_day(ts("2024-05-01T02:00:00")),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
        );
    }

    #[test]
    fn parse_accepts_minutes_only() {
        assert_eq!(
            parse_time_of_day("06:30").unwrap(),
            NaiveTime::from_hms_opt(6, 30, 0).unwrap()
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            parse_time_of_day("25:99"),
            Err(EventError::InvalidTimeFormat { .. })
        ));
        assert!(matches!(
            parse_time_of_day("morning"),
            Err(EventError::InvalidTimeFormat { .. })
        ));
    }

    proptest! {
        /// Day shifts are identity on the punch date, for any punch time.
        #[test]
        fn day_shift_identity(
            start_h in 0u32..24, end_off in 0u32..12,
            punch_secs in 0u32..86_400,
            days in 0i64..730,
        ) {
            let start = NaiveTime::from_hms_opt(start_h, 0, 0).unwrap();
            let end_h = (start_h + end_off).min(23);
            let end = NaiveTime::from_hms_opt(end_h, 59, 0).unwrap();
            prop_assume!(end >= start);
            let s = Shift { id: 1, name: "d".into(), start_time: start, end_time: end };

            let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(days);
            let t = date.and_time(NaiveTime::MIN) + Duration::seconds(punch_secs as i64);
            prop_assert_eq!(s.shift_day(t), t.date());
        }

        /// Overnight resolution moves the date back at most one day and
        /// only on the early side of the start boundary.
        #[test]
        fn overnight_rolls_back_at_most_one_day(
            start_h in 13u32..24, end_h in 0u32..12,
            punch_secs in 0u32..86_400,
        ) {
            let s = Shift {
                id: 1,
                name: "n".into(),
                start_time: NaiveTime::from_hms_opt(start_h, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(end_h, 0, 0).unwrap(),
            };
            prop_assume!(s.is_overnight());

            let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
            let t = date.and_time(NaiveTime::MIN) + Duration::seconds(punch_secs as i64);
            let resolved = s.shift_day(t);
            if t.time() >= s.start_time {
                prop_assert_eq!(resolved, date);
            } else {
                prop_assert_eq!(resolved, date - Duration::days(1));
            }
        }
    }
}
