//! Small helpers shared by the tmqtt crates: the [`Counter`] gauge, duration and address
//! parsing for configuration, and millisecond timestamps.

#![deny(unsafe_code)]

use std::net::SocketAddr;
use std::time::Duration;

use serde::{de, Deserialize, Deserializer};

mod counter;

pub use counter::Counter;

/// Milliseconds since the Unix epoch
pub type TimestampMillis = i64;

#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    chrono::Local::now().timestamp_millis()
}

/// Parses durations such as `"10s"`, `"1m30s"` or `"250ms"`.
///
/// Units are `ms`, `s`, `m`, `h` and `d`. Anything that does not parse counts as zero.
///
/// ```
/// let retry = tmqtt_utils::to_duration("1h30m15s");
/// assert_eq!(retry.as_secs(), 5415);
/// ```
pub fn to_duration(text: &str) -> Duration {
    let mut total = Duration::ZERO;
    let mut rest = text.trim();
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let Ok(value) = rest[..digits].parse::<u64>() else {
            return Duration::ZERO;
        };
        rest = &rest[digits..];
        let (unit, len) = match rest.as_bytes() {
            [b'm', b's', ..] => (Duration::from_millis(1), 2),
            [b's', ..] => (Duration::from_secs(1), 1),
            [b'm', ..] => (Duration::from_secs(60), 1),
            [b'h', ..] => (Duration::from_secs(3600), 1),
            [b'd', ..] => (Duration::from_secs(86400), 1),
            _ => return Duration::ZERO,
        };
        total += unit * value as u32;
        rest = &rest[len..];
    }
    total
}

#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(to_duration(&String::deserialize(deserializer)?))
}

#[inline]
pub fn deserialize_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer)?.parse().map_err(de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_duration() {
        assert_eq!(to_duration("10s"), Duration::from_secs(10));
        assert_eq!(to_duration("1m30s"), Duration::from_secs(90));
        assert_eq!(to_duration("1500ms"), Duration::from_millis(1500));
        assert_eq!(to_duration("2d"), Duration::from_secs(172_800));
        assert_eq!(to_duration("0s"), Duration::ZERO);
        assert_eq!(to_duration("bogus"), Duration::ZERO);
        assert_eq!(to_duration("15"), Duration::ZERO);
    }

    #[test]
    fn test_timestamp_millis() {
        assert!(timestamp_millis() > 1_600_000_000_000);
    }
}
