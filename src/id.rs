//! ID generation utilities for drainq
//!
//! Provides wall-clock timestamps and unique identifiers for checkpoints and
//! temporary files.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a unique checkpoint ID
///
/// Format: `{timestamp_ms}-{random_hex}`
/// Example: `1738300800123-a1b2c3d4`
pub fn generate_checkpoint_id() -> String {
    let timestamp = now_ms();
    let random: u32 = rand::rng().random();
    format!("{}-{:08x}", timestamp, random)
}

/// Generate a short random suffix for temporary file names
pub fn random_suffix() -> String {
    let random: u64 = rand::rng().random();
    format!("{:016x}", random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        let ts = now_ms();
        // Should be after 2020-01-01 and before 2100-01-01
        assert!(ts > 1577836800000);
        assert!(ts < 4102444800000);
    }

    #[test]
    fn test_generate_checkpoint_id_format() {
        let id = generate_checkpoint_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_checkpoint_id_uniqueness() {
        let id1 = generate_checkpoint_id();
        let id2 = generate_checkpoint_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_random_suffix_is_hex() {
        let suffix = random_suffix();
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
