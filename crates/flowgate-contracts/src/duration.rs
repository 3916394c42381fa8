//! Duration strings for resource manifests
//!
//! Timeouts and retry delays are written as a decimal number with a unit
//! suffix: `ms`, `s`, `m`, or `h`. Zero, negative, and suffix-less values
//! are rejected.

use std::time::Duration;

use thiserror::Error;

/// Errors from parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationParseError {
    /// The string is empty or contains no digits
    #[error("empty duration")]
    Empty,

    /// The unit suffix is missing or not one of ms/s/m/h
    #[error("unknown duration unit in '{0}' (expected ms, s, m, or h)")]
    UnknownUnit(String),

    /// The numeric part failed to parse
    #[error("invalid duration value in '{0}'")]
    InvalidValue(String),

    /// Durations must be strictly positive
    #[error("duration '{0}' is not positive")]
    NotPositive(String),

    /// The manifest grid is whole milliseconds
    #[error("duration '{0}' has sub-millisecond precision")]
    SubMillisecond(String),
}

/// Parse a duration string like `200ms`, `5s`, `2m`, or `1h`.
pub fn parse_duration(s: &str) -> Result<Duration, DurationParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let unit_start = s
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != '-' && c != '+')
        .ok_or_else(|| DurationParseError::UnknownUnit(s.to_string()))?;
    let (value_str, unit) = s.split_at(unit_start);

    let value: f64 = value_str
        .parse()
        .map_err(|_| DurationParseError::InvalidValue(s.to_string()))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(DurationParseError::NotPositive(s.to_string()));
    }

    let millis = match unit {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return Err(DurationParseError::UnknownUnit(s.to_string())),
    };

    // Whole milliseconds only, so every accepted value survives a
    // format/parse round trip. The tolerance absorbs float noise from
    // fractional values like "0.1s".
    let rounded = millis.round();
    if (millis - rounded).abs() > 1e-6 {
        return Err(DurationParseError::SubMillisecond(s.to_string()));
    }

    Ok(Duration::from_millis(rounded as u64))
}

/// Format a duration back into the manifest string form.
///
/// Picks the largest unit that represents the value exactly, so parsing the
/// result round-trips.
pub fn format_duration(d: Duration) -> String {
    let millis = d.as_millis();
    if millis == 0 {
        return "0ms".to_string();
    }
    if millis % 3_600_000 == 0 {
        format!("{}h", millis / 3_600_000)
    } else if millis % 60_000 == 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{millis}ms")
    }
}

/// Serde support for `Duration` as a manifest duration string
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_duration(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde support for `Option<Duration>` as a manifest duration string
pub mod option_duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&super::format_duration(*d)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => super::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}
