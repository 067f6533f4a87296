use chrono::{DateTime, TimeZone, Utc};

/// Converts provider epoch seconds into a UTC instant.
///
/// Every timestamp that enters the store passes through here, so stored and
/// incoming instants are always compared in the same representation.
pub fn from_epoch(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// The UNIX epoch. Placeholder rows carry it so that any real provider
/// event compares newer.
pub fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_epoch_is_utc() {
        let t = from_epoch(1_700_000_000).unwrap();
        assert_eq!(t.to_rfc3339(), "2023-11-14T22:13:20+00:00");
    }

    #[test]
    fn test_epoch_sorts_before_everything() {
        assert!(epoch() < from_epoch(1).unwrap());
    }
}
