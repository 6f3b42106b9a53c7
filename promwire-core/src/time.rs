//! Timestamp and sample value tokens used by the JSON form of the query API
//!
//! The API renders timestamps as fractional seconds since the Unix epoch and sample
//! values as strings. Internally every timestamp is an `i64` count of milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Write};

use crate::error::{CodecError, CodecResult};

const MILLIS_PER_SECOND: u64 = 1000;

/// How whole-second timestamps are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampStyle {
    /// `1609459200`, `1609459200.250`: fraction only when the millisecond part is non-zero
    #[default]
    Prometheus,
    /// `1609459200.000`: always three decimals
    FixedMillis,
}

impl TimestampStyle {
    /// Parse a style name as used in configuration
    pub fn parse(name: &str) -> CodecResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "prometheus" => Ok(TimestampStyle::Prometheus),
            "fixed_millis" | "fixed" => Ok(TimestampStyle::FixedMillis),
            other => Err(CodecError::configuration(format!(
                "unknown timestamp style '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for TimestampStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimestampStyle::Prometheus => "prometheus",
            TimestampStyle::FixedMillis => "fixed_millis",
        };
        write!(f, "{}", s)
    }
}

/// Write a millisecond timestamp as decimal seconds
pub fn write_timestamp<W: Write>(out: &mut W, millis: i64, style: TimestampStyle) -> io::Result<()> {
    let abs = millis.unsigned_abs();
    let seconds = abs / MILLIS_PER_SECOND;
    let fraction = abs % MILLIS_PER_SECOND;

    if millis < 0 {
        out.write_all(b"-")?;
    }
    write!(out, "{}", seconds)?;

    if fraction != 0 || style == TimestampStyle::FixedMillis {
        write!(out, ".{:03}", fraction)?;
    }
    Ok(())
}

/// Format a millisecond timestamp as decimal seconds
pub fn format_timestamp(millis: i64, style: TimestampStyle) -> String {
    let mut out = Vec::with_capacity(24);
    // Writing into a Vec cannot fail
    let _ = write_timestamp(&mut out, millis, style);
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a decimal seconds string into milliseconds without going through a float.
///
/// Digits past the third decimal round half up. Exponent forms fall back to float parsing.
pub fn parse_timestamp(text: &str) -> CodecResult<i64> {
    if text.bytes().any(|b| b == b'e' || b == b'E') {
        let seconds: f64 = text
            .parse()
            .map_err(|_| CodecError::malformed(format!("invalid timestamp '{}'", text)))?;
        return seconds_to_millis(seconds);
    }

    let (negative, body) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let (whole, fraction) = body.split_once('.').unwrap_or((body, ""));

    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !is_digits(whole) || !is_digits(fraction) {
        return Err(CodecError::malformed(format!("invalid timestamp '{}'", text)));
    }

    let seconds: i64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| CodecError::malformed(format!("timestamp out of range '{}'", text)))?
    };

    let digits = fraction.as_bytes();
    let mut millis = 0i64;
    for i in 0..3 {
        let digit = digits.get(i).map(|d| (d - b'0') as i64).unwrap_or(0);
        millis = millis * 10 + digit;
    }
    if digits.get(3).is_some_and(|d| *d >= b'5') {
        millis += 1;
    }

    let total = seconds
        .checked_mul(MILLIS_PER_SECOND as i64)
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(|| CodecError::malformed(format!("timestamp out of range '{}'", text)))?;

    Ok(if negative { -total } else { total })
}

/// Convert fractional seconds into milliseconds, rounding to the nearest millisecond
pub fn seconds_to_millis(seconds: f64) -> CodecResult<i64> {
    if !seconds.is_finite() {
        return Err(CodecError::malformed(format!(
            "timestamp must be finite, got {}",
            seconds
        )));
    }

    let millis = (seconds * MILLIS_PER_SECOND as f64).round();
    if millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return Err(CodecError::malformed(format!(
            "timestamp out of range: {}",
            seconds
        )));
    }
    Ok(millis as i64)
}

/// Convert whole seconds into milliseconds
pub fn whole_seconds_to_millis(seconds: i64) -> CodecResult<i64> {
    seconds
        .checked_mul(MILLIS_PER_SECOND as i64)
        .ok_or_else(|| CodecError::malformed(format!("timestamp out of range: {}", seconds)))
}

/// Write a sample value using the API's string form (`NaN`, `+Inf`, `-Inf` for special values)
pub fn write_float<W: Write>(out: &mut W, value: f64) -> io::Result<()> {
    if value.is_nan() {
        out.write_all(b"NaN")
    } else if value == f64::INFINITY {
        out.write_all(b"+Inf")
    } else if value == f64::NEG_INFINITY {
        out.write_all(b"-Inf")
    } else {
        let abs = value.abs();
        if abs != 0.0 && !(EXPONENT_BELOW..EXPONENT_FROM).contains(&abs) {
            write_exponent(out, value)
        } else {
            write!(out, "{}", value)
        }
    }
}

/// Magnitudes outside `[1e-6, 1e21)` use exponent notation, as the API serializer does
const EXPONENT_BELOW: f64 = 1e-6;
const EXPONENT_FROM: f64 = 1e21;

/// Shortest mantissa, then an exponent with an explicit sign and at least two digits
/// (`1e+21`, `1.5e-07`)
fn write_exponent<W: Write>(out: &mut W, value: f64) -> io::Result<()> {
    let text = format!("{:e}", value);
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            write!(out, "{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => out.write_all(text.as_bytes()),
    }
}

/// Format a sample value using the API's string form
pub fn format_float(value: f64) -> String {
    let mut out = Vec::with_capacity(24);
    let _ = write_float(&mut out, value);
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse a sample value from its string form
pub fn parse_float(text: &str) -> CodecResult<f64> {
    match text {
        "NaN" => Ok(f64::NAN),
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        _ => text
            .parse()
            .map_err(|_| CodecError::malformed(format!("invalid sample value '{}'", text))),
    }
}
