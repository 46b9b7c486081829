//! Timestamp utilities
//!
//! Timestamps are persisted as fixed-width RFC 3339 UTC text
//! (`2026-01-05T09:30:00.000Z`) so that SQL string comparison orders
//! them chronologically.

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Format a timestamp for storage
pub fn to_db(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp
pub fn from_db(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// Parse an optional stored timestamp
pub fn from_db_opt(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(from_db).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800); // 2000-01-01 00:00:00 UTC
        assert!(timestamp.timestamp() < 4_102_444_800); // 2100-01-01 00:00:00 UTC
    }

    #[test]
    fn test_db_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        let fractional = whole + Duration::milliseconds(7);

        assert_eq!(to_db(whole), "2026-01-05T09:30:00.000Z");
        assert_eq!(to_db(fractional), "2026-01-05T09:30:00.007Z");
        assert_eq!(to_db(whole).len(), to_db(fractional).len());
    }

    #[test]
    fn test_db_format_orders_lexically() {
        let earlier = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        let later = earlier + Duration::milliseconds(500);
        assert!(to_db(earlier) < to_db(later));
    }

    #[test]
    fn test_parse_stored_timestamp() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(from_db(&to_db(ts)).unwrap(), ts);
        assert!(from_db("not a timestamp").is_err());
        assert_eq!(from_db_opt(None).unwrap(), None);
    }
}
