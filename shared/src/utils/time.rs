//! Time-related utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since UNIX epoch with sub-second precision
pub fn unix_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Current system time in seconds since UNIX epoch
pub fn system_time_secs_f64() -> f64 {
    unix_secs(SystemTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_time() {
        // After 2020
        assert!(system_time_secs_f64() > 1_600_000_000.0);
    }

    #[test]
    fn test_unix_secs_fraction() {
        let t = UNIX_EPOCH + Duration::from_millis(1500);
        assert_eq!(unix_secs(t), 1.5);
    }

    #[test]
    fn test_before_epoch_clamps_to_zero() {
        let t = UNIX_EPOCH - Duration::from_secs(10);
        assert_eq!(unix_secs(t), 0.0);
    }
}
