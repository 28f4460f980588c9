//! Local-time helpers for the notification window and dedup keys.
//!
//! Everything here is a pure function of an instant and a fixed offset in
//! minutes. A window whose start hour is not below its end hour is always
//! closed; there is no wraparound past midnight.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};

const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

fn local_time(now: DateTime<Utc>, offset_minutes: i32) -> NaiveDateTime {
    now.naive_utc() + Duration::minutes(i64::from(offset_minutes))
}

/// Hour of day (0..=23) at `now` under the given offset.
pub fn local_hour(now: DateTime<Utc>, offset_minutes: i32) -> u32 {
    local_time(now, offset_minutes).hour()
}

/// `true` iff `start_hour <= local hour < end_hour`.
pub fn in_active_window(
    now: DateTime<Utc>,
    offset_minutes: i32,
    start_hour: u32,
    end_hour: u32,
) -> bool {
    let hour = local_hour(now, offset_minutes);
    start_hour <= hour && hour < end_hour
}

/// Local calendar day, `YYYY-MM-DD`.
pub fn day_key(now: DateTime<Utc>, offset_minutes: i32) -> String {
    local_time(now, offset_minutes)
        .format(DAY_KEY_FORMAT)
        .to_string()
}

/// Local hour bucket, `YYYY-MM-DDTHH`.
pub fn hour_key(now: DateTime<Utc>, offset_minutes: i32) -> String {
    local_time(now, offset_minutes)
        .format("%Y-%m-%dT%H")
        .to_string()
}

/// Day key of the local day before `now`.
pub fn previous_day_key(now: DateTime<Utc>, offset_minutes: i32) -> String {
    (local_time(now, offset_minutes) - Duration::days(1))
        .format(DAY_KEY_FORMAT)
        .to_string()
}

/// UTC half-open range `[start, end)` covering the local day `day_key`.
///
/// Returns `None` when `day_key` is not a `YYYY-MM-DD` date.
pub fn day_bounds_utc(
    day_key: &str,
    offset_minutes: i32,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let date = NaiveDate::parse_from_str(day_key, DAY_KEY_FORMAT).ok()?;
    let local_midnight = date.and_hms_opt(0, 0, 0)?;
    let start = (local_midnight - Duration::minutes(i64::from(offset_minutes))).and_utc();
    Some((start, start + Duration::days(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const BUENOS_AIRES: i32 = -180;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn local_hour_applies_negative_offset() {
        assert_eq!(local_hour(at(2024, 3, 10, 13, 0), BUENOS_AIRES), 10);
        assert_eq!(local_hour(at(2024, 3, 10, 1, 30), BUENOS_AIRES), 22);
    }

    #[test]
    fn local_hour_applies_positive_offset_with_minutes() {
        // +05:30
        assert_eq!(local_hour(at(2024, 3, 10, 20, 45), 330), 2);
    }

    #[test]
    fn window_is_half_open() {
        let offset = 0;
        assert!(!in_active_window(at(2024, 3, 10, 7, 59), offset, 8, 22));
        assert!(in_active_window(at(2024, 3, 10, 8, 0), offset, 8, 22));
        assert!(in_active_window(at(2024, 3, 10, 21, 59), offset, 8, 22));
        assert!(!in_active_window(at(2024, 3, 10, 22, 0), offset, 8, 22));
    }

    #[test]
    fn inverted_window_is_always_closed() {
        for hour in 0..24 {
            let now = at(2024, 3, 10, hour, 0);
            assert!(!in_active_window(now, 0, 22, 8));
            assert!(!in_active_window(now, 0, 9, 9));
        }
    }

    #[test]
    fn window_end_24_covers_last_hour() {
        assert!(in_active_window(at(2024, 3, 10, 23, 30), 0, 0, 24));
    }

    #[test]
    fn keys_follow_local_calendar() {
        // 01:30 UTC on the 10th is 22:30 on the 9th in UTC-3
        let now = at(2024, 3, 10, 1, 30);
        assert_eq!(day_key(now, BUENOS_AIRES), "2024-03-09");
        assert_eq!(hour_key(now, BUENOS_AIRES), "2024-03-09T22");
        assert_eq!(previous_day_key(now, BUENOS_AIRES), "2024-03-08");
    }

    #[test]
    fn previous_day_crosses_month_and_year() {
        assert_eq!(previous_day_key(at(2024, 3, 1, 12, 0), 0), "2024-02-29");
        assert_eq!(previous_day_key(at(2024, 1, 1, 12, 0), 0), "2023-12-31");
    }

    #[test]
    fn day_bounds_shift_by_offset() {
        let (start, end) = day_bounds_utc("2024-03-09", BUENOS_AIRES).unwrap();
        assert_eq!(start, at(2024, 3, 9, 3, 0));
        assert_eq!(end, at(2024, 3, 10, 3, 0));
    }

    #[test]
    fn day_bounds_reject_malformed_key() {
        assert!(day_bounds_utc("2024-13-01", 0).is_none());
        assert!(day_bounds_utc("yesterday", 0).is_none());
    }
}
