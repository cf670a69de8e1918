//! Timeout strings like "10s", "1m", "500ms" used throughout the config.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a timeout string.
///
/// Supported units: `ms`, `s`, `m`, `h`. Input is case-insensitive and trimmed.
///
/// ```
/// use billsync::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    // "ms" has to be checked before "m" and "s".
    let (num, millis_per_unit): (&str, u64) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60 * 1_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60 * 1_000)
    } else {
        anyhow::bail!("Duration must end with ms, s, m, or h: {s:?}");
    };

    let num: u64 = num
        .parse()
        .with_context(|| format!("Invalid number in duration: {s:?}"))?;
    let millis = num
        .checked_mul(millis_per_unit)
        .context("Duration is too large")?;

    Ok(Duration::from_millis(millis))
}

/// Format a duration using the largest unit that divides it evenly.
pub fn format_duration(d: Duration) -> String {
    const MS_PER_HOUR: u128 = 60 * 60 * 1_000;
    const MS_PER_MINUTE: u128 = 60 * 1_000;
    const MS_PER_SECOND: u128 = 1_000;

    let ms = d.as_millis();
    if ms >= MS_PER_HOUR && ms % MS_PER_HOUR == 0 {
        format!("{}h", ms / MS_PER_HOUR)
    } else if ms >= MS_PER_MINUTE && ms % MS_PER_MINUTE == 0 {
        format!("{}m", ms / MS_PER_MINUTE)
    } else if ms % MS_PER_SECOND == 0 {
        format!("{}s", ms / MS_PER_SECOND)
    } else {
        format!("{ms}ms")
    }
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}
