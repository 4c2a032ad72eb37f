//! TTL cache of (tenant, external system) pairs already registered.
//!
//! Entries expire so that renames and ownership changes on the registry
//! side eventually get merged again.
use moka::future::Cache;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone)]
pub struct ExternalSystemCache {
    known: Cache<(String, String), ()>,
}

impl std::fmt::Debug for ExternalSystemCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalSystemCache")
            .field("entries", &self.known.entry_count())
            .finish()
    }
}

impl ExternalSystemCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ttl: Duration, max_capacity: u64) -> Self {
        info!(ttl_seconds = ttl.as_secs(), max_capacity, "external system cache configured");
        Self {
            known: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }

    pub async fn contains(&self, tenant: &str, external_system: &str) -> bool {
        self.known
            .get(&(tenant.to_string(), external_system.to_string()))
            .await
            .is_some()
    }

    pub async fn insert(&self, tenant: &str, external_system: &str) {
        self.known
            .insert((tenant.to_string(), external_system.to_string()), ())
            .await;
    }

    pub async fn invalidate(&self, tenant: &str, external_system: &str) {
        self.known
            .invalidate(&(tenant.to_string(), external_system.to_string()))
            .await;
    }

    pub fn invalidate_all(&self) {
        self.known.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_invalidate() {
        let cache = ExternalSystemCache::new(Duration::from_secs(60));
        assert!(!cache.contains("t1", "hubspot").await);
        cache.insert("t1", "hubspot").await;
        assert!(cache.contains("t1", "hubspot").await);
        assert!(!cache.contains("t2", "hubspot").await);
        cache.invalidate("t1", "hubspot").await;
        assert!(!cache.contains("t1", "hubspot").await);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = ExternalSystemCache::new(Duration::from_millis(30));
        cache.insert("t1", "slack").await;
        assert!(cache.contains("t1", "slack").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.contains("t1", "slack").await);
    }
}
