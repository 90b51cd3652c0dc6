//! Human-readable durations in config files ("500ms", "10s", "3m", "1h").

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const UNITS: [(&str, u64); 4] = [
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
    ("ms", 1),
];

fn unit_millis(unit: &str) -> Option<u64> {
    UNITS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit))
        .map(|(_, millis)| *millis)
}

/// Parse a duration string. A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("duration '{}' does not start with a number", s));
    }

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid number in duration '{}'", s))?;
    let multiplier = if unit.is_empty() {
        1000
    } else {
        unit_millis(unit).ok_or_else(|| format!("unknown duration unit '{}'", unit))?
    };

    value
        .checked_mul(multiplier)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration '{}' is too large", s))
}

/// Format with the largest unit that divides the duration evenly
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    for (name, unit) in UNITS {
        if millis.is_multiple_of(unit) {
            return format!("{}{}", millis / unit, name);
        }
    }
    format!("{}ms", millis)
}

pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

pub fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}
