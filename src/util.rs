use chrono::{DateTime, DurationRound, Utc};
use chrono_tz::Tz;

/// Truncate to the start of the clock hour.
pub fn hour_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(chrono::Duration::hours(1)).unwrap_or(ts)
}

/// Truncate to the start of the 5-minute bucket.
pub fn five_min_floor(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(chrono::Duration::minutes(5)).unwrap_or(ts)
}

/// Hour of day (0-23) of a UTC instant in the given billing zone.
pub fn local_hour(ts: DateTime<Utc>, zone: Tz) -> u32 {
    use chrono::Timelike;
    ts.with_timezone(&zone).hour()
}

/// Calendar date of a UTC instant in the given billing zone.
pub fn local_date(ts: DateTime<Utc>, zone: Tz) -> chrono::NaiveDate {
    ts.with_timezone(&zone).date_naive()
}
