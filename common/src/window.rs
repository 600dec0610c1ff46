use chrono::{DateTime, Datelike, Days, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// Grace added past the configured season end day. Kept literal: the end day
/// plus nine hours into the following day.
pub const SEASON_END_GRACE_HOURS: i64 = 24 + 9;

/// Hour after which a dark reading may open a `light` window.
pub const LIGHT_WINDOW_EARLIEST_HOUR: u32 = 12;

pub const LIGHT_START: &str = "light";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeSpecError {
    #[error("expected two fields separated by '{0}'")]
    Shape(char),
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("{field} {value} is out of range")]
    OutOfRange { field: &'static str, value: i64 },
}

fn split_pair(spec: &str, separator: char) -> Result<(i64, i64), TimeSpecError> {
    let mut fields = spec.split(separator);
    let (Some(first), Some(second), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(TimeSpecError::Shape(separator));
    };
    let parse = |field: &str| {
        field
            .parse::<i64>()
            .map_err(|_| TimeSpecError::NotANumber(field.to_string()))
    };
    Ok((parse(first)?, parse(second)?))
}

fn check_range(
    field: &'static str,
    value: i64,
    range: std::ops::RangeInclusive<i64>,
) -> Result<(), TimeSpecError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(TimeSpecError::OutOfRange { field, value })
    }
}

/// Strict `HH:MM` parser returning the offset from midnight.
pub fn try_parse_hhmm(spec: &str) -> Result<Duration, TimeSpecError> {
    let (hour, minute) = split_pair(spec, ':')?;
    check_range("hour", hour, 0..=23)?;
    check_range("minute", minute, 0..=59)?;
    Ok(Duration::hours(hour) + Duration::minutes(minute))
}

/// `HH:MM` as an offset from midnight, `default_hour:00` on any error.
pub fn parse_hhmm(spec: &str, default_hour: u32) -> Duration {
    try_parse_hhmm(spec).unwrap_or_else(|_| Duration::hours(i64::from(default_hour)))
}

/// Wall-clock instant today at the offset named by `spec`.
pub fn window_instant(
    now: DateTime<FixedOffset>,
    spec: &str,
    default_hour: u32,
) -> DateTime<FixedOffset> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    at_local(now, midnight + parse_hhmm(spec, default_hour))
}

fn day_of_year_offset(year: i32, month: u32, day: u32) -> Option<Duration> {
    let jan_first = NaiveDate::from_ymd_opt(year, 1, 1)?;
    // Day overflow rolls into the next month (02/30 is March 1st or 2nd).
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let date = first.checked_add_days(Days::new(u64::from(day) - 1))?;
    Some(date.signed_duration_since(jan_first))
}

/// Strict `MM/DD` parser returning the offset from January 1st of `year`.
pub fn try_parse_mmdd(spec: &str, year: i32) -> Result<Duration, TimeSpecError> {
    let (month, day) = split_pair(spec, '/')?;
    check_range("month", month, 1..=12)?;
    check_range("day", day, 1..=31)?;
    day_of_year_offset(year, month as u32, day as u32)
        .ok_or(TimeSpecError::OutOfRange {
            field: "month",
            value: month,
        })
}

/// `MM/DD` as an offset from January 1st, the default date on any error.
pub fn parse_mmdd(spec: &str, default_month: u32, default_day: u32, year: i32) -> Duration {
    try_parse_mmdd(spec, year).unwrap_or_else(|_| {
        day_of_year_offset(year, default_month, default_day.max(1))
            .unwrap_or_else(Duration::zero)
    })
}

/// Interval membership. A start at or after the end wraps past midnight (or
/// the new year), so membership becomes `now >= start || now < end`.
pub fn in_window(
    now: DateTime<FixedOffset>,
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
) -> bool {
    if start < end {
        start <= now && now < end
    } else {
        now >= start || now < end
    }
}

pub fn year_start(now: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let jan_first = NaiveDate::from_ymd_opt(now.year(), 1, 1)
        .unwrap_or_else(|| now.date_naive())
        .and_time(NaiveTime::MIN);
    at_local(now, jan_first)
}

/// Season membership; the end boundary is extended by [`SEASON_END_GRACE_HOURS`].
pub fn in_season(
    now: DateTime<FixedOffset>,
    start: &str,
    end: &str,
    default_start: (u32, u32),
    default_end: (u32, u32),
) -> bool {
    let base = year_start(now);
    let year = now.year();
    let start = base + parse_mmdd(start, default_start.0, default_start.1, year);
    let end = base
        + parse_mmdd(end, default_end.0, default_end.1, year)
        + Duration::hours(SEASON_END_GRACE_HOURS);
    in_window(now, start, end)
}

/// `window-start=light`: from noon until `end`, and only while it is dark.
pub fn in_light_window(
    now: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
    light_level: i32,
    darkness_threshold: i32,
) -> bool {
    let midnight = now.date_naive().and_time(NaiveTime::MIN);
    let noon = midnight + Duration::hours(i64::from(LIGHT_WINDOW_EARLIEST_HOUR));
    light_level < darkness_threshold && in_window(now, at_local(now, noon), end)
}

fn at_local(now: DateTime<FixedOffset>, target: NaiveDateTime) -> DateTime<FixedOffset> {
    now + target.signed_duration_since(now.naive_local())
}
