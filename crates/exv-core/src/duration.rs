//! Human-friendly duration strings used throughout `exv.toml`.

use std::time::Duration;

/// Longest duration accepted anywhere in the configuration.
pub const MAX_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Parse a duration string like "5s", "500ms", "2m".
///
/// A bare number is read as seconds. Values that do not fit in a
/// `Duration` are rejected rather than wrapped.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits.parse().ok()?;
    match unit.trim() {
        "" | "s" => Some(Duration::from_secs(value)),
        "ms" => Some(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs),
        _ => None,
    }
}

/// Like [`parse_duration`], but also rejects anything above [`MAX_DURATION`].
pub fn parse_bounded(s: &str) -> Option<Duration> {
    parse_duration(s).filter(|d| *d <= MAX_DURATION)
}
