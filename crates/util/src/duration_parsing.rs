use std::time::Duration;

/// Parse durations such as `"30s"`, `"10m"`, or `"1h"`. A bare number is seconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let trimmed = text.trim();
    let last = trimmed.chars().last()?;
    if last.is_ascii_alphabetic() {
        let amount: u64 = trimmed[..trimmed.len() - 1].trim().parse().ok()?;
        return match last {
            's' | 'S' => Some(Duration::from_secs(amount)),
            'm' | 'M' => amount.checked_mul(60).map(Duration::from_secs),
            'h' | 'H' => amount.checked_mul(3600).map(Duration::from_secs),
            _ => None,
        };
    }
    trimmed.parse().ok().map(Duration::from_secs)
}
