//! Utility functions.

use chrono::{DateTime, Utc};

/// Parse duration string (e.g., "1h", "30m", "1d").
///
/// Supported units:
/// - m: minutes
/// - h: hours
/// - d: days
/// - w: weeks
pub fn parse_duration(input: &str) -> Option<std::time::Duration> {
    let input = input.trim();
    if input.len() < 2 {
        return None;
    }

    let (digits, unit) = input.split_at(input.len() - 1);
    let amount: u64 = digits.parse().ok()?;

    let seconds = match unit {
        "m" => amount * 60,
        "h" => amount * 3600,
        "d" => amount * 86400,
        "w" => amount * 604800,
        _ => return None,
    };

    Some(std::time::Duration::from_secs(seconds))
}

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render a unix timestamp as UTC for admin-facing output.
pub fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("30m"), Some(std::time::Duration::from_secs(1800)));
        assert_eq!(parse_duration("1h"), Some(std::time::Duration::from_secs(3600)));
        assert_eq!(parse_duration("1d"), Some(std::time::Duration::from_secs(86400)));
        assert_eq!(parse_duration("1w"), Some(std::time::Duration::from_secs(604800)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a < b & c > d"), "a &lt; b &amp; c &gt; d");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "1970-01-01 00:00 UTC");
    }
}
