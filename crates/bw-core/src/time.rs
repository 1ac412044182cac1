//! Time utilities for burrow

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Get the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is set before the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Milliseconds between `since` and `now`, 0 if `since` is later
pub fn millis_between(since: u64, now: u64) -> u64 {
    now.saturating_sub(since)
}

/// Elapsed time since a millisecond timestamp, zero if it is in the future
pub fn elapsed_duration(since_millis: u64) -> Duration {
    Duration::from_millis(millis_between(since_millis, current_time_millis()))
}

/// Render a millisecond timestamp as a coarse age ("5m", "3h", "2d")
pub fn format_age(since_millis: u64, now_millis: u64) -> String {
    let secs = millis_between(since_millis, now_millis) / 1000;
    match secs {
        0..=59 => format!("{}s", secs),
        60..=3599 => format!("{}m", secs / 60),
        3600..=86_399 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_time_millis_is_positive() {
        assert!(current_time_millis() > 0);
    }

    #[test]
    fn test_future_timestamps_saturate() {
        assert_eq!(millis_between(2_000, 1_000), 0);
        assert_eq!(elapsed_duration(u64::MAX), Duration::ZERO);
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(0, 42_000), "42s");
        assert_eq!(format_age(0, 5 * 60_000), "5m");
        assert_eq!(format_age(0, 3 * 3_600_000), "3h");
        assert_eq!(format_age(0, 49 * 3_600_000), "2d");
    }
}
