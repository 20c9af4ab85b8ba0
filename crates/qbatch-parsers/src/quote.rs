//! POSIX shell quoting.

/// Quote a value so a POSIX shell reads it back as a single word.
///
/// Values made only of characters that are safe unquoted are returned
/// as-is; everything else is wrapped in single quotes, with embedded single
/// quotes rendered as `'"'"'`.
pub fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\"'\"'"))
}
