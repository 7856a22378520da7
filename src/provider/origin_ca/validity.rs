//! # Validity
//!
//! Maps a requested certificate lifetime onto the validity periods the
//! Origin CA accepts.

use super::error::CaError;
use crate::constants::DEFAULT_VALIDITY_DAYS;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Validity periods accepted by the Origin CA (days)
pub const ALLOWED_VALIDITY_DAYS: [u32; 7] = [7, 30, 90, 365, 730, 1095, 5475];

static DURATION_SEGMENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+(?:\.\d+)?)(?P<unit>ns|us|µs|ms|s|m|h)")
        .expect("Failed to compile DURATION_SEGMENT_REGEX - this should never happen")
});

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Parse a Go duration string such as `2160h0m0s` or `1.5h`
pub fn parse_go_duration(duration_str: &str) -> Result<Duration, CaError> {
    let trimmed = duration_str.trim();
    if trimmed.is_empty() {
        return Err(CaError::validation("duration cannot be empty"));
    }

    let mut total_secs = 0f64;
    let mut consumed = 0usize;
    for captures in DURATION_SEGMENT_REGEX.captures_iter(trimmed) {
        let (Some(segment), Some(number), Some(unit)) =
            (captures.get(0), captures.name("number"), captures.name("unit"))
        else {
            continue;
        };
        if segment.start() != consumed {
            break;
        }
        consumed = segment.end();

        let value: f64 = number.as_str().parse().map_err(|e| {
            CaError::validation(format!(
                "invalid duration number '{}' in '{trimmed}': {e}",
                number.as_str()
            ))
        })?;
        let scale = match unit.as_str() {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            _ => 3600.0,
        };
        total_secs += value * scale;
    }

    if consumed != trimmed.len() {
        return Err(CaError::validation(format!(
            "invalid duration '{trimmed}': expected a Go duration such as '2160h0m0s'"
        )));
    }

    Duration::try_from_secs_f64(total_secs)
        .map_err(|e| CaError::validation(format!("duration '{trimmed}' out of range: {e}")))
}

/// Closest accepted validity for a requested lifetime
///
/// Ties resolve to the shorter period.
pub fn closest_validity_days(requested: Duration) -> u32 {
    let requested_days = requested.as_secs_f64() / SECONDS_PER_DAY;
    ALLOWED_VALIDITY_DAYS
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (f64::from(*a) - requested_days).abs();
            let db = (f64::from(*b) - requested_days).abs();
            da.total_cmp(&db)
        })
        .unwrap_or(DEFAULT_VALIDITY_DAYS)
}

/// Validity for an optional requested duration; 90 days when absent
pub fn validity_days(duration: Option<&str>) -> Result<u32, CaError> {
    match duration {
        None => Ok(DEFAULT_VALIDITY_DAYS),
        Some(d) => parse_go_duration(d).map(closest_validity_days),
    }
}
