//! Timestamp utilities

use chrono::Utc;

/// Current time as whole seconds since the Unix epoch
pub fn epoch_seconds() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_seconds_is_recent() {
        // After 2000-01-01 00:00:00 UTC
        assert!(epoch_seconds() > 946_684_800);
    }

    #[test]
    fn test_epoch_seconds_does_not_go_backwards() {
        let first = epoch_seconds();
        let second = epoch_seconds();
        assert!(second >= first);
    }
}
