use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = taskora_common::id::prefixed_ulid("ses");
/// assert!(id.starts_with("ses_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new())
}

/// Well-known ID prefixes minted by the client.
///
/// Server-assigned ids are opaque to this layer and carry whatever prefix
/// the backend chose; only the prefixes below are ever created locally.
pub mod prefix {
    /// Realtime session id, one per login.
    pub const SESSION: &str = "ses";
    /// Temporary id for a locally-created record awaiting confirmation.
    pub const LOCAL: &str = "local";
    /// Idempotency key attached to a pending write.
    pub const IDEMPOTENCY: &str = "idem";
}

/// True when `id` is a client-minted temporary id rather than a
/// server-assigned one.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with("local_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_ulid_format() {
        let id = prefixed_ulid("ses");
        assert!(id.starts_with("ses_"));
        // ULID is 26 chars, plus prefix + underscore
        assert_eq!(id.len(), 4 + 26);
    }

    #[test]
    fn test_uniqueness() {
        let a = prefixed_ulid("local");
        let b = prefixed_ulid("local");
        assert_ne!(a, b);
    }

    #[test]
    fn local_ids_are_distinguishable() {
        assert!(is_local_id(&prefixed_ulid(prefix::LOCAL)));
        assert!(!is_local_id(&prefixed_ulid(prefix::SESSION)));
        assert!(!is_local_id("msg_01J8X4"));
    }
}
