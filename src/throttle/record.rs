//! The stored unit of the throttle protocol.

/// One recorded attempt against an (already scoped) key.
///
/// Records are never updated. They count toward their key's quota while
/// `expire_at` is in the future and are purged afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleRecord {
    /// Effective key, after scoping
    pub key: String,
    /// Expiry as epoch milliseconds
    pub expire_at: i64,
}

impl ThrottleRecord {
    /// Create a record for `key` that expires `window_ms` after `now`.
    pub fn new(key: impl Into<String>, now: i64, window_ms: u64) -> Self {
        let window = i64::try_from(window_ms).unwrap_or(i64::MAX);
        Self {
            key: key.into(),
            expire_at: now.saturating_add(window),
        }
    }

    /// Whether the record still counts at time `now`.
    pub fn is_live(&self, now: i64) -> bool {
        self.expire_at > now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_expiry_is_exclusive() {
        let record = ThrottleRecord::new("k", 1_000, 500);
        assert_eq!(record.expire_at, 1_500);
        assert!(record.is_live(1_499));
        assert!(!record.is_live(1_500));
    }

    #[test]
    fn test_huge_window_saturates() {
        let record = ThrottleRecord::new("k", 10, u64::MAX);
        assert_eq!(record.expire_at, i64::MAX);
    }
}
