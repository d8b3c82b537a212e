//! Alignment of time axis points. All calendar math happens in UTC.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, NaiveDate, Utc};

use crate::error::{QuerierError, codes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl CalendarUnit {
    pub const ALL: [CalendarUnit; 7] = [
        CalendarUnit::Minute,
        CalendarUnit::Hour,
        CalendarUnit::Day,
        CalendarUnit::Week,
        CalendarUnit::Month,
        CalendarUnit::Quarter,
        CalendarUnit::Year,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minute" => Some(CalendarUnit::Minute),
            "hour" => Some(CalendarUnit::Hour),
            "day" => Some(CalendarUnit::Day),
            "week" => Some(CalendarUnit::Week),
            "month" => Some(CalendarUnit::Month),
            "quarter" => Some(CalendarUnit::Quarter),
            "year" => Some(CalendarUnit::Year),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarUnit::Minute => "minute",
            CalendarUnit::Hour => "hour",
            CalendarUnit::Day => "day",
            CalendarUnit::Week => "week",
            CalendarUnit::Month => "month",
            CalendarUnit::Quarter => "quarter",
            CalendarUnit::Year => "year",
        }
    }

    /// Nominal length in milliseconds, used for estimates only.
    pub fn approx_millis(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            CalendarUnit::Minute => MINUTE,
            CalendarUnit::Hour => 60 * MINUTE,
            CalendarUnit::Day => 1_440 * MINUTE,
            CalendarUnit::Week => 7 * 1_440 * MINUTE,
            CalendarUnit::Month => 30 * 1_440 * MINUTE,
            CalendarUnit::Quarter => 91 * 1_440 * MINUTE,
            CalendarUnit::Year => 365 * 1_440 * MINUTE,
        }
    }
}

fn to_datetime(ms: i64) -> Result<DateTime<Utc>, QuerierError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        QuerierError::validation(
            codes::INVALID_TIME_RANGE,
            format!("timestamp {ms} is out of range"),
        )
    })
}

fn midnight(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Align `ms` down to a multiple of `step_ms`.
pub fn align_fixed(ms: i64, step_ms: i64) -> i64 {
    if step_ms <= 0 {
        return ms;
    }
    ms.div_euclid(step_ms) * step_ms
}

/// Start of the calendar unit containing `ms`. Weeks start on Monday.
pub fn align_calendar(ms: i64, unit: CalendarUnit) -> Result<i64, QuerierError> {
    let dt = to_datetime(ms)?;
    let date = dt.date_naive();
    let aligned = match unit {
        CalendarUnit::Minute => align_fixed(ms, 60_000),
        CalendarUnit::Hour => align_fixed(ms, 3_600_000),
        CalendarUnit::Day => midnight(date),
        CalendarUnit::Week => {
            let back = i64::from(date.weekday().num_days_from_monday());
            midnight(date) - back * 86_400_000
        }
        CalendarUnit::Month => midnight(date.with_day(1).unwrap_or(date)),
        CalendarUnit::Quarter => {
            let month = (date.month0() / 3) * 3 + 1;
            midnight(NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date))
        }
        CalendarUnit::Year => {
            midnight(NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date))
        }
    };
    Ok(aligned)
}

/// Start of the calendar unit following the one starting at `ms`.
pub fn next_calendar(ms: i64, unit: CalendarUnit) -> Result<i64, QuerierError> {
    let dt = to_datetime(ms)?;
    let next = match unit {
        CalendarUnit::Minute => Some(dt + ChronoDuration::minutes(1)),
        CalendarUnit::Hour => Some(dt + ChronoDuration::hours(1)),
        CalendarUnit::Day => Some(dt + ChronoDuration::days(1)),
        CalendarUnit::Week => Some(dt + ChronoDuration::weeks(1)),
        CalendarUnit::Month => dt.checked_add_months(Months::new(1)),
        CalendarUnit::Quarter => dt.checked_add_months(Months::new(3)),
        CalendarUnit::Year => dt.checked_add_months(Months::new(12)),
    };
    next.map(|t| t.timestamp_millis()).ok_or_else(|| {
        QuerierError::validation(
            codes::INVALID_TIME_RANGE,
            format!("timestamp {ms} is out of range"),
        )
    })
}
