//! Wall-clock helpers. Wire timestamps are milliseconds since the Unix
//! epoch, as unsigned 64-bit integers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_recent() {
        // Any date after 2024-01-01.
        assert!(now_millis() > 1_704_067_200_000);
    }
}
