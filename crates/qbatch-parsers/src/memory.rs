//! Memory amount conversions for scheduler resource requests.

/// Convert a byte count to whole kilobytes (1024-byte units, rounded down).
pub fn kilobytes(bytes: u64) -> u64 {
    bytes / 1024
}

/// Render a byte count as a Torque memory limit in kilobytes.
///
/// `2097152` becomes `"2048K"`.
pub fn format_memory_kb(bytes: u64) -> String {
    format!("{}K", kilobytes(bytes))
}

/// Parse a human memory amount to bytes.
///
/// Accepts "4G", "1000M", "4096K" and plain byte counts ("1048576").
/// Suffixes are binary (1K = 1024 bytes) and case-insensitive; a trailing
/// "B" is allowed ("4GB").
pub fn parse_memory_bytes(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    if s.is_empty() {
        return None;
    }
    let s = s.strip_suffix('B').unwrap_or(&s);

    let (digits, multiplier) = if let Some(stripped) = s.strip_suffix('T') {
        (stripped, 1024u64.pow(4))
    } else if let Some(stripped) = s.strip_suffix('G') {
        (stripped, 1024u64.pow(3))
    } else if let Some(stripped) = s.strip_suffix('M') {
        (stripped, 1024u64.pow(2))
    } else if let Some(stripped) = s.strip_suffix('K') {
        (stripped, 1024)
    } else {
        (s, 1)
    };

    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_memory_kb() {
        assert_eq!(format_memory_kb(2_097_152), "2048K");
        assert_eq!(format_memory_kb(0), "0K");
        assert_eq!(format_memory_kb(1023), "0K");
        assert_eq!(format_memory_kb(1025), "1K");
    }

    #[test]
    fn test_parse_memory_bytes() {
        assert_eq!(parse_memory_bytes("4G"), Some(4 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("4gb"), Some(4 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("1000M"), Some(1000 * 1024 * 1024));
        assert_eq!(parse_memory_bytes("4096K"), Some(4096 * 1024));
        assert_eq!(parse_memory_bytes("1048576"), Some(1_048_576));
        assert_eq!(parse_memory_bytes(""), None);
        assert_eq!(parse_memory_bytes("lots"), None);
    }
}
