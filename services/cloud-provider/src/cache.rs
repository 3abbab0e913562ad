//! Time-bounded caches over the cloud API.
//!
//! The instance-type catalog changes rarely and is only refreshed by TTL.
//! Instance listings are kept per region and are invalidated eagerly after
//! every create or delete in that region.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dcas_api::{ApiError, CloudApi, Instance, InstanceFilter, InstanceType};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::retry::{retry_transient, BackoffPolicy};

/// A single cached value with a refresh instant.
#[derive(Debug, Clone)]
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Option<(T, Instant)>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entry: None }
    }

    /// The cached value, if it is still fresh.
    pub fn get(&self) -> Option<T> {
        match &self.entry {
            Some((value, refreshed)) if refreshed.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn store(&mut self, value: T) {
        self.entry = Some((value, Instant::now()));
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    pub fn is_fresh(&self) -> bool {
        self.get().is_some()
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
}

/// Cached view of the instance-type catalog and per-region instance
/// listings.
///
/// A refresh holds the write lock across the API call, so concurrent readers
/// of a stale entry wait for one fetch instead of issuing their own.
pub struct CachedInventory {
    api: Arc<dyn CloudApi>,
    instance_types: RwLock<TtlCache<Vec<InstanceType>>>,
    instances: RwLock<HashMap<String, TtlCache<Vec<Instance>>>>,
    instance_ttl: Duration,
    backoff: BackoffPolicy,
    stats: CacheStats,
}

impl CachedInventory {
    pub fn new(
        api: Arc<dyn CloudApi>,
        instance_ttl: Duration,
        instance_type_ttl: Duration,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            api,
            instance_types: RwLock::new(TtlCache::new(instance_type_ttl)),
            instances: RwLock::new(HashMap::new()),
            instance_ttl,
            backoff,
            stats: CacheStats::default(),
        }
    }

    /// The instance-type catalog.
    pub async fn instance_types(&self) -> Result<Vec<InstanceType>, ApiError> {
        if let Some(types) = self.instance_types.read().await.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(types);
        }

        let mut cache = self.instance_types.write().await;
        if let Some(types) = cache.get() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(types);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let api = &self.api;
        let types = retry_transient(&self.backoff, "list_instance_types", || {
            api.list_instance_types()
        })
        .await?;
        debug!(count = types.len(), "Refreshed instance-type catalog");

        cache.store(types.clone());
        Ok(types)
    }

    /// Every instance in `region`, whatever its status.
    pub async fn instances(&self, region: &str) -> Result<Vec<Instance>, ApiError> {
        if let Some(instances) = self.instances.read().await.get(region).and_then(TtlCache::get) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(instances);
        }

        let mut caches = self.instances.write().await;
        if let Some(instances) = caches.get(region).and_then(TtlCache::get) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(instances);
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let api = &self.api;
        let filter = InstanceFilter::location(region);
        let instances = retry_transient(&self.backoff, "list_instances", || {
            api.list_instances(&filter)
        })
        .await?;
        debug!(region, count = instances.len(), "Refreshed instance listing");

        caches
            .entry(region.to_string())
            .or_insert_with(|| TtlCache::new(self.instance_ttl))
            .store(instances.clone());
        Ok(instances)
    }

    /// Force the next listing of `region` to hit the API.
    pub async fn invalidate_region(&self, region: &str) {
        if let Some(cache) = self.instances.write().await.get_mut(region) {
            cache.invalidate();
            self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!(region, "Invalidated instance listing");
        }
    }

    /// Force the next listing of every region to hit the API.
    pub async fn invalidate_all_instances(&self) {
        let mut caches = self.instances.write().await;
        for cache in caches.values_mut() {
            cache.invalidate();
        }
        self.stats.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
