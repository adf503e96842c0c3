use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A memory-tier value with its expiry and version tag.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    pub(crate) value: Arc<dyn Any + Send + Sync>,
    pub(crate) inserted_at: Instant,
    pub(crate) expires_at: Instant,
    pub(crate) version: Option<String>,
    /// Insertion order, used to pick eviction victims.
    pub(crate) sequence: u64,
}

impl CacheEntry {
    pub(crate) fn new(
        value: Arc<dyn Any + Send + Sync>,
        ttl: Duration,
        version: Option<&str>,
        sequence: u64,
    ) -> Self {
        let inserted_at = Instant::now();
        Self {
            value,
            inserted_at,
            expires_at: inserted_at + ttl,
            version: version.map(str::to_string),
            sequence,
        }
    }

    /// Visible while `now <= expires_at`.
    pub(crate) fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    /// An untagged entry or an untagged request always matches.
    pub(crate) fn matches_version(&self, requested: Option<&str>) -> bool {
        match (self.version.as_deref(), requested) {
            (Some(stored), Some(requested)) => stored == requested,
            _ => true,
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("inserted_at", &self.inserted_at)
            .field("expires_at", &self.expires_at)
            .field("version", &self.version)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_matching() {
        let tagged = CacheEntry::new(Arc::new(1u32), Duration::from_secs(1), Some("v1"), 0);
        assert!(tagged.matches_version(Some("v1")));
        assert!(!tagged.matches_version(Some("v2")));
        assert!(tagged.matches_version(None));

        let untagged = CacheEntry::new(Arc::new(1u32), Duration::from_secs(1), None, 1);
        assert!(untagged.matches_version(Some("anything")));
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CacheEntry::new(Arc::new(()), Duration::from_millis(10), None, 0);
        assert!(!entry.is_expired_at(entry.expires_at));
        assert!(entry.is_expired_at(entry.expires_at + Duration::from_nanos(1)));
    }
}
