//! Provides parsing and formatting helpers for durations as they appear in config files and logs.
use std::fmt::Write;
use std::time::Duration;

const UNITS: [(&str, u128); 4] = [
    ("d", 24 * 60 * 60 * 1000),
    ("h", 60 * 60 * 1000),
    ("m", 60 * 1000),
    ("s", 1000),
];

/// Parses a duration like "10m" or "30 s".
///
/// The following suffixes are supported (case insensitive): **ms**, **s**, **m**, **h** and **d**.
/// A plain number is treated as seconds, as this is what the GC interval has always been
/// configured in.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(pkgx::fmt::parse_duration("250 ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(pkgx::fmt::parse_duration("45").unwrap(), Duration::from_secs(45));
/// assert_eq!(pkgx::fmt::parse_duration("10m").unwrap(), Duration::from_secs(600));
/// assert_eq!(pkgx::fmt::parse_duration("2 H").unwrap(), Duration::from_secs(2 * 60 * 60));
/// assert_eq!(pkgx::fmt::parse_duration("1d").unwrap(), Duration::from_secs(24 * 60 * 60));
///
/// // Unknown suffixes, fractions and negative numbers are rejected...
/// assert!(pkgx::fmt::parse_duration("3 weeks").is_err());
/// assert!(pkgx::fmt::parse_duration("1.5s").is_err());
/// assert!(pkgx::fmt::parse_duration("-1m").is_err());
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref NUMBER_AND_SUFFIX: regex::Regex =
            regex::Regex::new(r"^ *(\d+) *([a-zA-Z]*) *$").unwrap();
    }

    let captures = NUMBER_AND_SUFFIX.captures(str.as_ref()).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration. Expected a positive number and optionally \
             'ms', 's', 'm', 'h' or 'd' as suffix.",
            str.as_ref()
        )
    })?;

    let number = captures[1].parse::<u64>()?;
    match captures[2].to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(number)),
        "" | "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(number.saturating_mul(60 * 60))),
        "d" => Ok(Duration::from_secs(number.saturating_mul(60 * 60 * 24))),
        suffix => Err(anyhow::anyhow!(
            "Unknown duration suffix '{}' in '{}'.",
            suffix,
            str.as_ref()
        )),
    }
}

/// Formats a duration into a string like "1h 10m 5s".
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(pkgx::fmt::format_duration(Duration::from_secs(600)), "10m");
/// assert_eq!(pkgx::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(pkgx::fmt::format_duration(Duration::from_secs(90_061)), "1d 1h 1m 1s");
/// assert_eq!(pkgx::fmt::format_duration(Duration::ZERO), "0s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let mut result = String::new();
    let mut millis = duration.as_millis();

    for (suffix, factor) in UNITS {
        let amount = millis / factor;
        if amount > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", amount, suffix);
            millis %= factor;
        }
    }

    if millis > 0 {
        if !result.is_empty() {
            result.push(' ');
        }
        let _ = write!(result, "{}ms", millis);
    }

    if result.is_empty() {
        result.push_str("0s");
    }

    result
}
