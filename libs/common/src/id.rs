use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = helios_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const CONNECTION: &str = "conn";
    pub const SESSION: &str = "ses";
    pub const USER: &str = "usr";
    pub const ROLL: &str = "roll";
    pub const CHARACTER: &str = "chr";
    pub const MESSAGE: &str = "msg";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("conn");
        assert!(id.starts_with("conn_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 5 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid("conn");
        let b = prefixed_ulid("conn");
        assert_ne!(a, b);
    }
}
