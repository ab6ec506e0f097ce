//! Human-readable scan interval parsing
//!
//! Intervals are written as a number followed by a single unit character:
//! `30m`, `24h`, `1d`, `1w`.

use thiserror::Error;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Longest accepted interval, one hundred years
pub const MAX_INTERVAL: i64 = 100 * 365 * DAY;

/// Errors produced when an interval string cannot be parsed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntervalError {
    /// Too short, the prefix is not plain digits, or the value exceeds
    /// [`MAX_INTERVAL`]
    #[error("invalid interval format: {0:?}")]
    InvalidFormat(String),

    /// Unit character is not one of m, h, d, w
    #[error("unsupported interval unit: {0:?}")]
    UnsupportedUnit(char),
}

/// Parse an interval string into seconds
///
/// # Examples
///
/// ```
/// use imagescan::task::parse_interval;
///
/// assert_eq!(parse_interval("24h").unwrap(), 86_400);
/// assert_eq!(parse_interval("1w").unwrap(), 604_800);
/// ```
pub fn parse_interval(s: &str) -> Result<i64, IntervalError> {
    let mut chars = s.chars();
    let unit = match chars.next_back() {
        Some(unit) if s.chars().count() >= 2 => unit,
        _ => return Err(IntervalError::InvalidFormat(s.to_string())),
    };

    let digits = chars.as_str();
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(IntervalError::InvalidFormat(s.to_string()));
    }
    let amount: i64 = digits
        .parse()
        .map_err(|_| IntervalError::InvalidFormat(s.to_string()))?;

    let multiplier = match unit {
        'm' => MINUTE,
        'h' => HOUR,
        'd' => DAY,
        'w' => WEEK,
        other => return Err(IntervalError::UnsupportedUnit(other)),
    };

    amount
        .checked_mul(multiplier)
        .filter(|seconds| *seconds <= MAX_INTERVAL)
        .ok_or_else(|| IntervalError::InvalidFormat(s.to_string()))
}
