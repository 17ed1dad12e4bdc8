//! Short-lived in-process cache for role/permission lookups.
//!
//! The verifier consults the identity store for a principal's grants on
//! demand rather than per request. Entries live for at most
//! [`GrantsCache::MAX_TTL`]; the capacity is bounded and the
//! soonest-to-expire entry is evicted when it fills up.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::verifier::Grants;

/// A bounded TTL cache keyed by principal id.
pub struct GrantsCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    grants: Grants,
    expires_at: Instant,
}

impl GrantsCache {
    /// Hard upper bound on the entry TTL.
    pub const MAX_TTL: Duration = Duration::from_secs(60);

    /// Create a cache with the given TTL (clamped to [`Self::MAX_TTL`])
    /// and entry capacity.
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl: ttl.min(Self::MAX_TTL),
            capacity: capacity.max(1),
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Grants> {
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.grants.clone()),
            Some(_) => {
                inner.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert an entry, evicting expired entries first and then the
    /// soonest-to-expire one if still at capacity.
    pub fn insert(&self, key: String, grants: Grants) {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        inner.retain(|_, entry| entry.expires_at > now);

        if inner.len() >= self.capacity && !inner.contains_key(&key) {
            if let Some(evict) = inner
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone())
            {
                inner.remove(&evict);
            }
        }

        inner.insert(
            key,
            Entry {
                grants,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop an entry (e.g. after a role change).
    pub fn invalidate(&self, key: &str) {
        self.inner.lock().remove(key);
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grants(role: &str) -> Grants {
        Grants {
            roles: [role.to_string()].into(),
            permissions: [format!("{role}:things")].into(),
        }
    }

    #[test]
    fn insert_and_get() {
        let cache = GrantsCache::new(Duration::from_secs(30), 8);
        cache.insert("user:1".into(), grants("user"));

        let hit = cache.get("user:1").unwrap();
        assert!(hit.roles.contains("user"));
        assert!(cache.get("user:2").is_none());
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = GrantsCache::new(Duration::from_millis(0), 8);
        cache.insert("user:1".into(), grants("user"));
        assert!(cache.get("user:1").is_none());
    }

    #[test]
    fn ttl_is_clamped() {
        let cache = GrantsCache::new(Duration::from_secs(3600), 8);
        assert_eq!(cache.ttl, GrantsCache::MAX_TTL);
    }

    #[test]
    fn capacity_is_bounded() {
        let cache = GrantsCache::new(Duration::from_secs(30), 2);
        cache.insert("a".into(), grants("a"));
        cache.insert("b".into(), grants("b"));
        cache.insert("c".into(), grants("c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = GrantsCache::new(Duration::from_secs(30), 8);
        cache.insert("user:1".into(), grants("user"));
        cache.invalidate("user:1");
        assert!(cache.is_empty());
    }
}
