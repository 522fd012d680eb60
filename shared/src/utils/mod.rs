//! Utility functions and helpers

pub mod time;

/// Bytes per megabyte as used in every report (1024^2)
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Convert a byte count to megabytes
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Convert a signed byte delta to megabytes
pub fn delta_to_mb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// Convert megabytes to bytes, rounding down
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(104_857_600), 100.0);
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(512 * 1024), 0.5);
    }

    #[test]
    fn test_delta_to_mb() {
        assert_eq!(delta_to_mb(-1_048_576), -1.0);
    }

    #[test]
    fn test_mb_to_bytes() {
        assert_eq!(mb_to_bytes(100), 104_857_600);
        assert_eq!(mb_to_bytes(u64::MAX), u64::MAX);
    }
}
