// SPDX-License-Identifier: Apache-2.0

//! Parsing helpers for human-friendly configuration values.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::time::Duration;

/// Parse a duration.
///
/// A bare number is a count of seconds (`"1"`, `"0.5"`). Anything else goes through
/// [`humantime::parse_duration`] (`"250ms"`, `"1m30s"`, `"2h 5min"`).
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("invalid duration '{}': {}", s, e));
    }

    humantime::parse_duration(s).map_err(|e| format!("invalid duration '{}': {}", s, e))
}

/// Parse a byte count such as `1000`, `"1kb"`, `"1KiB"`, `"1.1kb"` or `"16MiB"`.
/// Units are case-insensitive; `kb`/`mb`/`gb` are decimal, `kib`/`mib`/`gib` binary.
pub fn parse_byte_size(s: &str) -> Result<u64, String> {
    s.trim()
        .parse::<bytesize::ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("invalid byte size '{}': {}", s, e))
}

/// A byte count that deserializes from either a number or a unit-suffixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.0)
    }
}

impl std::str::FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_byte_size(s).map(ByteSize)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Number(num) => num
                .as_f64()
                .filter(|n| *n >= 0.0)
                .map(|n| ByteSize(n.round() as u64))
                .ok_or_else(|| serde::de::Error::custom("byte size must be non-negative")),
            serde_json::Value::String(s) => s.parse().map_err(serde::de::Error::custom),
            _ => Err(serde::de::Error::custom("unexpected value for byte size")),
        }
    }
}

/// Deserialize a duration from a number of seconds or a unit-suffixed string.
pub(crate) fn deser_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(num) => num
            .as_f64()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .ok_or_else(|| serde::de::Error::custom("duration must be non-negative")),
        serde_json::Value::String(s) => parse_duration(&s).map_err(serde::de::Error::custom),
        _ => Err(serde::de::Error::custom("unexpected value for duration")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    struct DurationConfig {
        #[serde(deserialize_with = "deser_duration")]
        value: Duration,
    }

    #[derive(Deserialize, Debug)]
    struct SizeConfig {
        value: ByteSize,
    }

    #[test]
    fn test_parse_duration_bare_number_is_seconds() {
        assert_eq!(parse_duration("1").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("0.5").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("1ms").unwrap(), Duration::from_millis(1));
        assert_eq!(parse_duration("1000ms").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("250us").unwrap(), Duration::from_micros(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("-1").is_err());
    }

    #[test]
    fn test_parse_byte_size() {
        assert_eq!(parse_byte_size("1000").unwrap(), 1000);
        assert_eq!(parse_byte_size("1kb").unwrap(), 1000);
        assert_eq!(parse_byte_size("1KB").unwrap(), 1000);
        assert_eq!(parse_byte_size("1kib").unwrap(), 1024);
        assert_eq!(parse_byte_size("1KiB").unwrap(), 1024);
        assert_eq!(parse_byte_size("1.1kb").unwrap(), 1100);
        assert_eq!(parse_byte_size("1mib").unwrap(), 1048576);
        assert_eq!(parse_byte_size("1MiB").unwrap(), 1048576);
        assert_eq!(parse_byte_size("1MB").unwrap(), 1_000_000);
        assert!(parse_byte_size("1zb").is_err());
        assert!(parse_byte_size("kb").is_err());
        assert!(parse_byte_size("").is_err());
    }

    #[test]
    fn test_deser_duration_from_number_and_string() {
        let config: DurationConfig = serde_json::from_str(r#"{"value": 1}"#).unwrap();
        assert_eq!(config.value, Duration::from_secs(1));

        let config: DurationConfig = serde_json::from_str(r#"{"value": "1ms"}"#).unwrap();
        assert_eq!(config.value, Duration::from_millis(1));

        assert!(serde_json::from_str::<DurationConfig>(r#"{"value": true}"#).is_err());
    }

    #[test]
    fn test_deser_byte_size_from_number_and_string() {
        let config: SizeConfig = serde_json::from_str(r#"{"value": 1000}"#).unwrap();
        assert_eq!(config.value, ByteSize(1000));

        let config: SizeConfig = serde_json::from_str(r#"{"value": "1KiB"}"#).unwrap();
        assert_eq!(config.value, ByteSize(1024));

        assert!(serde_json::from_str::<SizeConfig>(r#"{"value": -5}"#).is_err());
        assert!(serde_json::from_str::<SizeConfig>(r#"{"value": null}"#).is_err());
    }
}
