//! Step, interval and keep-alive duration strings.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Largest duration representable as signed nanoseconds.
const MAX_NANOS: u64 = i64::MAX as u64;

const NANOS_PER_MS: u64 = 1_000_000;
const NANOS_PER_SECOND: u64 = 1_000 * NANOS_PER_MS;
const NANOS_PER_MINUTE: u64 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: u64 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: u64 = 24 * NANOS_PER_HOUR;

static DAY_HOUR_MINUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+d)?(\d+h)?(\d+m)?$").expect("static regex"));
static DAY_HOUR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+d)?(\d+h)?$").expect("static regex"));

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DurationError {
    #[error("empty duration string")]
    Empty,
    #[error("not a valid duration string: {0:?}")]
    Malformed(String),
    #[error("unknown unit {unit:?} in duration {input:?}")]
    UnknownUnit { unit: String, input: String },
    #[error("duration out of range: {0:?}")]
    OutOfRange(String),
    #[error("duration {input:?} does not match {pattern}")]
    PatternMismatch { input: String, pattern: &'static str },
}

/// Granularity a caller accepts for fixed intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationPattern {
    DayHourMinute,
    DayHour,
}

impl DurationPattern {
    fn regex(&self) -> &'static Regex {
        match self {
            DurationPattern::DayHourMinute => &DAY_HOUR_MINUTE,
            DurationPattern::DayHour => &DAY_HOUR,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            DurationPattern::DayHourMinute => "^(\\d+d)?(\\d+h)?(\\d+m)?$",
            DurationPattern::DayHour => "^(\\d+d)?(\\d+h)?$",
        }
    }
}

/// Position (biggest unit first) and nanosecond multiplier of a unit.
fn unit(u: &str) -> Option<(u8, u64)> {
    match u {
        "y" => Some((1, 365 * NANOS_PER_DAY)),
        "w" => Some((2, 7 * NANOS_PER_DAY)),
        "d" => Some((3, NANOS_PER_DAY)),
        "h" => Some((4, NANOS_PER_HOUR)),
        "m" => Some((5, NANOS_PER_MINUTE)),
        "s" => Some((6, NANOS_PER_SECOND)),
        "ms" => Some((7, NANOS_PER_MS)),
        _ => None,
    }
}

/// Parse `1d12h`, `5m`, `30s`, `250ms`, ...
///
/// Units must appear from biggest to smallest; a year is 365 days. `"0"` is
/// accepted without a unit. Durations beyond the signed 64-bit nanosecond
/// range are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    match input {
        "0" => return Ok(Duration::ZERO),
        "" => return Err(DurationError::Empty),
        _ => {}
    }

    let malformed = || DurationError::Malformed(input.to_string());
    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut total: u64 = 0;
    let mut last_unit = 0u8;

    while pos < bytes.len() {
        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == digits_start {
            return Err(malformed());
        }
        let value: u64 = input[digits_start..pos].parse().map_err(|_| malformed())?;

        let unit_start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == unit_start {
            return Err(malformed());
        }
        let name = &input[unit_start..pos];
        let (order, mult) = unit(name).ok_or_else(|| DurationError::UnknownUnit {
            unit: name.to_string(),
            input: input.to_string(),
        })?;
        if order <= last_unit {
            return Err(malformed());
        }
        last_unit = order;

        let out_of_range = || DurationError::OutOfRange(input.to_string());
        let part = value.checked_mul(mult).ok_or_else(out_of_range)?;
        total = total.checked_add(part).ok_or_else(out_of_range)?;
        if total > MAX_NANOS {
            return Err(out_of_range());
        }
    }

    Ok(Duration::from_nanos(total))
}

/// Parse a fixed interval restricted to the granularity of `pattern`.
pub fn parse_with_pattern(
    input: &str,
    pattern: DurationPattern,
) -> Result<Duration, DurationError> {
    if input.is_empty() {
        return Err(DurationError::Empty);
    }
    if !pattern.regex().is_match(input) {
        return Err(DurationError::PatternMismatch {
            input: input.to_string(),
            pattern: pattern.describe(),
        });
    }
    parse_duration(input)
}

/// Parse a keep-alive: an integer followed by exactly one of `s`, `m`, `h`.
pub fn parse_keep_alive(input: &str) -> Result<Duration, DurationError> {
    let Some((split, _)) = input.char_indices().last() else {
        return Err(DurationError::Malformed(input.to_string()));
    };
    let (value, unit) = input.split_at(split);
    if value.is_empty() {
        return Err(DurationError::Malformed(input.to_string()));
    }
    let value: u64 = value
        .parse()
        .map_err(|_| DurationError::Malformed(input.to_string()))?;

    let secs = match unit {
        "s" => Some(value),
        "m" => value.checked_mul(60),
        "h" => value.checked_mul(3600),
        _ => {
            return Err(DurationError::UnknownUnit {
                unit: unit.to_string(),
                input: input.to_string(),
            });
        }
    };
    let secs = secs.ok_or_else(|| DurationError::OutOfRange(input.to_string()))?;
    if secs > MAX_NANOS / NANOS_PER_SECOND {
        return Err(DurationError::OutOfRange(input.to_string()));
    }
    Ok(Duration::from_secs(secs))
}
