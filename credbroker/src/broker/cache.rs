use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, PoisonError, RwLock};

use crate::common::Credentials;

/// The most recently resolved credentials
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub credentials: Credentials,
    pub resolved_at: DateTime<Utc>,
    pub method: String,
    /// Set for methods that always hand out temporary credentials
    pub requires_expiry: bool,
}

/// Single-entry credential cache (one authenticated identity per broker)
///
/// Entries are swapped as a whole behind an `Arc`, so readers see either the
/// old entry or the new one and never a half-written value.
#[derive(Debug, Default)]
pub struct CredentialCache {
    entry: RwLock<Option<Arc<CacheEntry>>>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<CacheEntry>> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn put(&self, entry: CacheEntry) {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(entry));
    }

    pub fn clear(&self) -> Option<Arc<CacheEntry>> {
        self.entry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Stale once `now >= expires_at - margin`. Missing expiry is stale only
    /// when the method is supposed to produce temporary credentials.
    pub fn is_stale(entry: &CacheEntry, now: DateTime<Utc>, margin: Duration) -> bool {
        match entry.credentials.expires_at {
            Some(expires_at) => now >= expires_at - margin,
            None => entry.requires_expiry,
        }
    }

    /// The cached entry if it is still fresh at `now`
    pub fn fresh(&self, now: DateTime<Utc>, margin: Duration) -> Option<Arc<CacheEntry>> {
        self.get()
            .filter(|entry| !Self::is_stale(entry, now, margin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(expires_at: Option<DateTime<Utc>>, requires_expiry: bool) -> CacheEntry {
        CacheEntry {
            credentials: Credentials::new("AKIA", "secret", None, expires_at, "test"),
            resolved_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap(),
            method: "test".to_string(),
            requires_expiry,
        }
    }

    #[test]
    fn test_stale_boundary() {
        let expires_at = Utc.with_ymd_and_hms(2030, 1, 1, 1, 0, 0).unwrap();
        let margin = Duration::minutes(5);
        let cached = entry(Some(expires_at), true);

        let boundary = expires_at - margin;
        assert!(!CredentialCache::is_stale(&cached, boundary - Duration::seconds(1), margin));
        assert!(!CredentialCache::is_stale(&cached, boundary - Duration::nanoseconds(1), margin));
        assert!(CredentialCache::is_stale(&cached, boundary, margin));
        assert!(CredentialCache::is_stale(&cached, expires_at, margin));
        assert!(CredentialCache::is_stale(&cached, expires_at + Duration::hours(1), margin));
    }

    #[test]
    fn test_expiring_within_margin_is_stale() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let cached = entry(Some(now + Duration::seconds(30)), true);
        assert!(CredentialCache::is_stale(&cached, now, Duration::minutes(5)));
    }

    #[test]
    fn test_non_expiring_credentials() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let margin = Duration::minutes(5);
        assert!(!CredentialCache::is_stale(&entry(None, false), now, margin));
        assert!(CredentialCache::is_stale(&entry(None, true), now, margin));
    }

    #[test]
    fn test_put_replaces_whole_entry() {
        let cache = CredentialCache::new();
        assert!(cache.get().is_none());

        let first = entry(None, false);
        cache.put(first.clone());
        let held = cache.get().unwrap();
        assert_eq!(*held, first);

        let mut second = entry(None, false);
        second.method = "replacement".to_string();
        cache.put(second.clone());

        // A reader holding the old Arc keeps a consistent snapshot
        assert_eq!(held.method, "test");
        assert_eq!(cache.get().unwrap().method, "replacement");

        assert!(cache.clear().is_some());
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_fresh_filters_stale_entries() {
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let cache = CredentialCache::new();
        cache.put(entry(Some(now + Duration::minutes(2)), true));
        assert!(cache.fresh(now, Duration::minutes(5)).is_none());
        assert!(cache.fresh(now, Duration::minutes(1)).is_some());
    }
}
