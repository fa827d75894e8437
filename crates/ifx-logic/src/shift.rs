//! Shift-window matching.
//!
//! Day-of-week is collapsed to a single code where Saturday and Sunday both
//! map to 0 and Monday through Friday map to 1..5. A weekend timestamp can
//! therefore only match a window registered with day code 0.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use ifx_common::ShiftReference;

/// Day code for a timestamp: 0 for Saturday/Sunday, 1..5 for Monday..Friday.
pub fn day_code(timestamp: DateTime<Utc>) -> u8 {
    match timestamp.weekday() {
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat | Weekday::Sun => 0,
    }
}

/// Seconds elapsed since midnight for a timestamp.
pub fn seconds_since_midnight(timestamp: DateTime<Utc>) -> u32 {
    timestamp.num_seconds_from_midnight()
}

/// First shift in list order whose day code matches and whose time range
/// contains the timestamp, inclusive on both ends. Overlapping windows are
/// not validated; first match wins.
pub fn match_shift(
    timestamp: DateTime<Utc>,
    shifts: &[ShiftReference],
) -> Option<&ShiftReference> {
    let day = day_code(timestamp);
    let seconds = seconds_since_midnight(timestamp);

    shifts.iter().find(|shift| {
        shift.from_day_of_week == day
            && seconds >= shift.from_time_of_day_seconds
            && seconds <= shift.to_time_of_day_seconds
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn shift(day: u8, from: u32, to: u32) -> ShiftReference {
        ShiftReference {
            id: Uuid::new_v4(),
            name: format!("shift-{}-{}", day, from),
            equipment_id: Uuid::new_v4(),
            area_id: Uuid::new_v4(),
            site_id: Uuid::new_v4(),
            from_day_of_week: day,
            from_time_of_day_seconds: from,
            to_time_of_day_seconds: to,
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn weekdays_map_to_one_through_five() {
        // 2024-01-08 is a Monday.
        assert_eq!(day_code(at(2024, 1, 8, 12, 0, 0)), 1);
        assert_eq!(day_code(at(2024, 1, 9, 12, 0, 0)), 2);
        assert_eq!(day_code(at(2024, 1, 10, 12, 0, 0)), 3);
        assert_eq!(day_code(at(2024, 1, 11, 12, 0, 0)), 4);
        assert_eq!(day_code(at(2024, 1, 12, 12, 0, 0)), 5);
    }

    #[test]
    fn both_weekend_days_map_to_zero() {
        assert_eq!(day_code(at(2024, 1, 13, 12, 0, 0)), 0); // Saturday
        assert_eq!(day_code(at(2024, 1, 14, 12, 0, 0)), 0); // Sunday
    }

    #[test]
    fn matches_first_window_in_list_order() {
        let first = shift(1, 0, 86_399);
        let second = shift(1, 0, 86_399);
        let shifts = vec![first.clone(), second];
        let matched = match_shift(at(2024, 1, 8, 8, 0, 0), &shifts).unwrap();
        assert_eq!(matched.id, first.id);
    }

    #[test]
    fn range_is_inclusive_on_both_ends() {
        // 07:00:00 to 15:00:00
        let shifts = vec![shift(1, 25_200, 54_000)];
        assert!(match_shift(at(2024, 1, 8, 7, 0, 0), &shifts).is_some());
        assert!(match_shift(at(2024, 1, 8, 15, 0, 0), &shifts).is_some());
        assert!(match_shift(at(2024, 1, 8, 6, 59, 59), &shifts).is_none());
        assert!(match_shift(at(2024, 1, 8, 15, 0, 1), &shifts).is_none());
    }

    #[test]
    fn weekday_timestamp_never_matches_weekend_window() {
        let shifts = vec![shift(0, 0, 86_399)];
        assert!(match_shift(at(2024, 1, 8, 8, 0, 0), &shifts).is_none());
    }

    #[test]
    fn weekend_timestamp_matches_day_zero_window() {
        let shifts = vec![shift(0, 0, 86_399)];
        assert!(match_shift(at(2024, 1, 13, 8, 0, 0), &shifts).is_some());
        assert!(match_shift(at(2024, 1, 14, 8, 0, 0), &shifts).is_some());
    }

    #[test]
    fn empty_list_never_matches() {
        assert!(match_shift(at(2024, 1, 8, 8, 0, 0), &[]).is_none());
    }
}
