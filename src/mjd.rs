//! Astronomical date utilities.
//!
//! Spec.md treats MJD computation as delegated to an external astronomy
//! routine, called with a "no leap second" parameter
//! that the original source always passes; the decision was made
//! to preserve that behaviour unless operations decides otherwise; nobody
//! has, so we do. `chrono` gives us the calendar arithmetic; the leap-second
//! correction is a deliberate no-op, named so a reader can find it and
//! change it later if that policy changes.

use chrono::{DateTime, NaiveDate, Utc};

/// Modified Julian Date for `when`, with leap seconds intentionally not
/// applied (see module docs).
pub fn mjd_no_leap_seconds(when: DateTime<Utc>) -> f64 {
    const MJD_EPOCH: i64 = 2_400_000; // JD of MJD epoch (offset from JD to MJD is 2400000.5)
    let jd = julian_day_number(when.date_naive());
    let day_fraction = {
        let secs_into_day = when.time().num_seconds_from_midnight() as f64
            + f64::from(when.timestamp_subsec_nanos()) / 1e9;
        secs_into_day / 86_400.0
    };
    (jd - MJD_EPOCH) as f64 - 0.5 + day_fraction
}

fn julian_day_number(date: NaiveDate) -> i64 {
    // Fliegel & Van Flandern algorithm, the standard integer JDN formula.
    use chrono::Datelike;
    let (y, m, d) = (date.year() as i64, date.month() as i64, date.day() as i64);
    let a = (14 - m) / 12;
    let y2 = y + 4800 - a;
    let m2 = m + 12 * a - 3;
    d + (153 * m2 + 2) / 5 + 365 * y2 + y2 / 4 - y2 / 100 + y2 / 400 - 32045
}

trait NumSecondsFromMidnight {
    fn num_seconds_from_midnight(&self) -> u32;
}

impl NumSecondsFromMidnight for chrono::NaiveTime {
    fn num_seconds_from_midnight(&self) -> u32 {
        use chrono::Timelike;
        self.hour() * 3600 + self.minute() * 60 + self.second()
    }
}

/// The "date number" (`yyyymmdd`) used to key the FITS filename sequencer,
/// shifted by 12 hours so one observing night keeps a single number
/// An observation starting at 01:00 UTC on the 16th
/// belongs to the night that started on the 15th.
pub fn date_number(when: DateTime<Utc>) -> i32 {
    let shifted = when - chrono::Duration::hours(12);
    let date = shifted.date_naive();
    use chrono::Datelike;
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_number_before_noon_belongs_to_previous_day() {
        let t = Utc.with_ymd_and_hms(2024, 1, 16, 1, 0, 0).unwrap();
        assert_eq!(date_number(t), 20240115);
    }

    #[test]
    fn date_number_after_noon_belongs_to_same_day() {
        let t = Utc.with_ymd_and_hms(2024, 1, 16, 13, 0, 0).unwrap();
        assert_eq!(date_number(t), 20240116);
    }

    #[test]
    fn mjd_matches_known_reference() {
        // 2000-01-01T00:00:00Z is MJD 51544.0
        let t = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let mjd = mjd_no_leap_seconds(t);
        assert!((mjd - 51544.0).abs() < 1e-6);
    }
}
