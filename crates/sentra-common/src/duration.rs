//! Duration strings in control blocks ("90s", "5m", "1h30m", bare seconds).

use chrono::Duration;

/// Parse a control-block duration string. Empty input yields zero.
/// Unknown units or garbage yield `None` so callers can treat the control
/// value as absent rather than failing the event.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Some(Duration::zero());
    }

    // Bare integer means seconds.
    if let Ok(secs) = s.parse::<i64>() {
        return Some(Duration::seconds(secs));
    }

    let mut total = Duration::zero();
    let mut num = String::new();
    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num.push(ch);
            continue;
        }
        let n: i64 = num.parse().ok()?;
        num.clear();
        total = total
            + match ch {
                's' => Duration::seconds(n),
                'm' => Duration::minutes(n),
                'h' => Duration::hours(n),
                'd' => Duration::days(n),
                _ => return None,
            };
    }

    // Trailing digits without a unit ("1h30") are malformed.
    if !num.is_empty() {
        return None;
    }

    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_units() {
        assert_eq!(parse_duration("90s"), Some(Duration::seconds(90)));
        assert_eq!(parse_duration("5m"), Some(Duration::minutes(5)));
        assert_eq!(parse_duration("2h"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
    }

    #[test]
    fn parses_compound_and_bare_seconds() {
        assert_eq!(
            parse_duration("1h30m"),
            Some(Duration::minutes(90))
        );
        assert_eq!(parse_duration("300"), Some(Duration::seconds(300)));
    }

    #[test]
    fn empty_is_zero_and_garbage_is_none() {
        assert_eq!(parse_duration(""), Some(Duration::zero()));
        assert_eq!(parse_duration("  "), Some(Duration::zero()));
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("1h30"), None);
    }
}
