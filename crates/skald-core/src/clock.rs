use anyhow::{Context, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Current UTC time as RFC 3339, truncated to whole seconds.
///
/// Whole-second precision keeps stored timestamps lexicographically
/// orderable (fractional digits of varying width break TEXT ORDER BY).
pub fn now_rfc3339() -> String {
    format_unix(now_unix())
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Format a unix-seconds timestamp as RFC 3339 (UTC, whole seconds).
pub fn format_unix(unix: i64) -> String {
    OffsetDateTime::from_unix_timestamp(unix)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
        .format(&Rfc3339)
        .expect("RFC3339 formatting should not fail")
}

/// Parse an RFC 3339 timestamp into unix seconds.
pub fn parse_rfc3339_unix(ts: &str) -> Result<i64> {
    let parsed = OffsetDateTime::parse(ts, &Rfc3339)
        .with_context(|| format!("invalid RFC 3339 timestamp: {ts:?}"))?;
    Ok(parsed.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_has_no_fractional_seconds() {
        let ts = now_rfc3339();
        assert!(!ts.contains('.'), "expected whole seconds, got {ts}");
        assert!(ts.ends_with('Z'));
    }

    #[test]
    fn format_parse_roundtrip() {
        let unix = 1_756_000_000;
        let ts = format_unix(unix);
        assert_eq!(parse_rfc3339_unix(&ts).unwrap(), unix);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_rfc3339_unix("not a time").is_err());
        assert!(parse_rfc3339_unix("2026-13-99T00:00:00Z").is_err());
    }

    #[test]
    fn whole_second_timestamps_sort_lexicographically() {
        let a = format_unix(1_756_000_000);
        let b = format_unix(1_756_000_001);
        assert!(a < b);
    }
}
