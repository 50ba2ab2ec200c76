//! Strict timestamp normalization.
//!
//! Exactly two textual forms are accepted, both UTC:
//!
//! ```text
//! 2024-06-01T12:00:00Z
//! 2024-06-01T12:00:00.123456Z
//! ```
//!
//! The resulting epoch-millis value is a storage key, so nothing else is
//! tolerated: no offsets, no other fraction widths, no missing `Z`.

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::DecodeError;

const BASE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const BASE_LEN: usize = 19;
const FRACTION_DIGITS: usize = 6;

/// Parse a raw timestamp into a UTC instant.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    let bad = || DecodeError::BadTimestamp(raw.to_string());

    let body = raw.strip_suffix('Z').ok_or_else(bad)?;
    let (base, micros) = match body.split_once('.') {
        None => (body, 0),
        Some((base, fraction)) => {
            if fraction.len() != FRACTION_DIGITS || !fraction.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            (base, fraction.parse::<u32>().map_err(|_| bad())?)
        }
    };

    if !has_fixed_layout(base) {
        return Err(bad());
    }

    let naive = NaiveDateTime::parse_from_str(base, BASE_FORMAT)
        .map_err(|_| bad())?
        .with_nanosecond(micros * 1_000)
        .ok_or_else(bad)?;
    Ok(naive.and_utc())
}

/// Parse a raw timestamp into milliseconds since the Unix epoch.
pub fn normalize(raw: &str) -> Result<i64, DecodeError> {
    parse(raw).map(|ts| ts.timestamp_millis())
}

/// `yyyy-MM-ddTHH:mm:ss` with zero-padded fields and seconds below 60.
/// chrono alone would also accept unpadded numbers and a leap second.
fn has_fixed_layout(base: &str) -> bool {
    base.len() == BASE_LEN
        && base.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            10 => b == b'T',
            13 | 16 => b == b':',
            17 => (b'0'..=b'5').contains(&b),
            _ => b.is_ascii_digit(),
        })
}
