//! ISO-8601 duration parsing for TTL suffixes
//!
//! Accepts the day-time subset `[+-]PnDTnHnMn.nS` (case-insensitive, signed
//! components, `.` or `,` as the fraction separator). Years, months and weeks
//! are rejected because they have no fixed length.

use crate::error::{CacheError, Result};
use std::time::Duration;

const NANOS_PER_SECOND: i128 = 1_000_000_000;
const NANOS_PER_MINUTE: i128 = 60 * NANOS_PER_SECOND;
const NANOS_PER_HOUR: i128 = 60 * NANOS_PER_MINUTE;
const NANOS_PER_DAY: i128 = 24 * NANOS_PER_HOUR;

/// Parse an ISO-8601 duration such as `PT30S`, `P1DT2H` or `PT0.5S`
///
/// Negative totals are rejected since a TTL cannot run backwards.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let invalid = |reason: &str| {
        CacheError::InvalidConfiguration(format!(
            "invalid ISO-8601 duration '{}': {}",
            text, reason
        ))
    };

    let upper = text.trim().to_ascii_uppercase();
    let (negative, unsigned) = match upper.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, upper.strip_prefix('+').unwrap_or(&upper)),
    };

    let body = unsigned
        .strip_prefix('P')
        .ok_or_else(|| invalid("missing 'P' designator"))?;

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut total: i128 = 0;
    let mut components = 0;

    if !date_part.is_empty() {
        let days = date_part
            .strip_suffix('D')
            .ok_or_else(|| invalid("only a day component may precede 'T'"))?;
        let days = parse_integer(days).ok_or_else(|| invalid("bad day component"))?;
        total = add_scaled(total, days, NANOS_PER_DAY).ok_or_else(|| invalid("duration overflow"))?;
        components += 1;
    }

    if let Some(time) = time_part {
        if time.is_empty() {
            return Err(invalid("'T' must be followed by a time component"));
        }

        let mut remaining = time;
        for (designator, unit) in [('H', NANOS_PER_HOUR), ('M', NANOS_PER_MINUTE)] {
            if let Some(pos) = remaining.find(designator) {
                let value = parse_integer(&remaining[..pos])
                    .ok_or_else(|| invalid("bad hour or minute component"))?;
                total = add_scaled(total, value, unit).ok_or_else(|| invalid("duration overflow"))?;
                remaining = &remaining[pos + 1..];
                components += 1;
            }
        }

        if !remaining.is_empty() {
            let seconds = remaining
                .strip_suffix('S')
                .ok_or_else(|| invalid("unexpected trailing characters"))?;
            let nanos = parse_seconds(seconds).ok_or_else(|| invalid("bad seconds component"))?;
            total = total
                .checked_add(nanos)
                .ok_or_else(|| invalid("duration overflow"))?;
            components += 1;
        }
    }

    if components == 0 {
        return Err(invalid("no duration components"));
    }

    if negative {
        total = total
            .checked_neg()
            .ok_or_else(|| invalid("duration overflow"))?;
    }

    if total < 0 {
        return Err(invalid("negative durations are not allowed"));
    }

    let secs = u64::try_from(total / NANOS_PER_SECOND).map_err(|_| invalid("duration overflow"))?;
    let nanos = (total % NANOS_PER_SECOND) as u32;
    Ok(Duration::new(secs, nanos))
}

/// Render a duration in the same `PTnS` form accepted by [`parse_duration`]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let nanos = duration.subsec_nanos();

    if nanos == 0 {
        format!("PT{}S", secs)
    } else {
        let fraction = format!("{:09}", nanos);
        format!("PT{}.{}S", secs, fraction.trim_end_matches('0'))
    }
}

/// `total + value * unit`, or `None` on overflow
fn add_scaled(total: i128, value: i128, unit: i128) -> Option<i128> {
    value.checked_mul(unit).and_then(|scaled| total.checked_add(scaled))
}

fn parse_integer(text: &str) -> Option<i128> {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<i128>().ok()
}

fn parse_seconds(text: &str) -> Option<i128> {
    let (whole, fraction) = match text.find(['.', ',']) {
        Some(pos) => (&text[..pos], Some(&text[pos + 1..])),
        None => (text, None),
    };

    let negative = whole.starts_with('-');
    let whole_nanos = parse_integer(whole)?.checked_mul(NANOS_PER_SECOND)?;

    let fraction_nanos = match fraction {
        Some(digits) => {
            if digits.len() > 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let padded = format!("{:0<9}", digits);
            padded.parse::<i128>().ok()?
        }
        None => 0,
    };

    if negative {
        whole_nanos.checked_sub(fraction_nanos)
    } else {
        whole_nanos.checked_add(fraction_nanos)
    }
}
