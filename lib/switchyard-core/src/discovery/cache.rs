//! TTL cache of routing tables in front of a registry

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use switchyard_api::Instance;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::discovery::{ChangeEvent, Registry, SubscriptionId, Watcher};
use crate::router::{ServiceTable, TableOptions};
use crate::selector::SelectorFactory;
use crate::singleflight::SingleFlight;
use crate::{CoreError, Result};

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10),
        }
    }
}

/// Result of one registry refresh, reported to the refresh observer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fresh,
    Stale,
    Failed,
}

impl RefreshOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshOutcome::Fresh => "fresh",
            RefreshOutcome::Stale => "stale",
            RefreshOutcome::Failed => "failed",
        }
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type RefreshObserver = Arc<dyn Fn(&str, RefreshOutcome) + Send + Sync>;

struct CacheEntry {
    table: Arc<ServiceTable>,
    expires_at: Instant,
}

/// Per-service routing tables with a time-to-live.
///
/// Readers never see a half-built table: a refresh builds a complete
/// [`ServiceTable`] and swaps it in. Concurrent misses for one service are
/// collapsed into a single registry fetch. When a refresh fails and an
/// older table exists, the old table keeps serving for another TTL.
pub struct DiscoveryCache {
    registry: Arc<dyn Registry>,
    factory: SelectorFactory,
    options: TableOptions,
    config: CacheConfig,
    entries: RwLock<HashMap<String, CacheEntry>>,
    flight: SingleFlight<String, Result<Arc<ServiceTable>>>,
    observer: Option<RefreshObserver>,
}

impl DiscoveryCache {
    pub fn new(
        registry: Arc<dyn Registry>,
        factory: SelectorFactory,
        options: TableOptions,
        config: CacheConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            options,
            config,
            entries: RwLock::new(HashMap::new()),
            flight: SingleFlight::new(),
            observer: None,
        }
    }

    pub fn with_refresh_observer(mut self, observer: RefreshObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }

    /// The routing table for `service`, fetching it when absent or expired
    pub async fn load(&self, service: &str) -> Result<Arc<ServiceTable>> {
        if let Some(table) = self.fresh(service) {
            return Ok(table);
        }
        self.flight
            .run(service.to_string(), || self.refresh(service))
            .await
    }

    /// Replace the table of `service` from a pushed instance list.
    ///
    /// If the list cannot be turned into a table the previous one stays.
    pub fn update(&self, service: &str, instances: Vec<Instance>) -> Result<()> {
        let table = ServiceTable::build(&self.factory, &self.options, instances).map_err(|e| {
            warn!(service = %service, error = %e, "Rejected pushed instance list");
            e
        })?;
        self.store(service, Arc::new(table));
        Ok(())
    }

    /// Drop the cached table so the next load goes to the registry
    pub fn invalidate(&self, service: &str) -> bool {
        self.entries.write().remove(service).is_some()
    }

    pub fn cached_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Keep the table of `service` current from the watcher's events.
    ///
    /// The subscription holds only a weak reference to the cache.
    pub async fn follow(self: &Arc<Self>, watcher: &Watcher, service: &str) -> Result<SubscriptionId> {
        let cache: Weak<Self> = Arc::downgrade(self);
        watcher
            .on_change(
                service,
                Arc::new(move |event: &ChangeEvent| {
                    if let Some(cache) = cache.upgrade() {
                        let _ = cache.update(&event.service, event.instances.as_ref().clone());
                    }
                }),
            )
            .await
    }

    fn fresh(&self, service: &str) -> Option<Arc<ServiceTable>> {
        let entries = self.entries.read();
        entries
            .get(service)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.table.clone())
    }

    fn store(&self, service: &str, table: Arc<ServiceTable>) {
        let expires_at = Instant::now() + self.config.ttl;
        self.entries
            .write()
            .insert(service.to_string(), CacheEntry { table, expires_at });
    }

    async fn refresh(&self, service: &str) -> Result<Arc<ServiceTable>> {
        // another flight may have finished between the miss and now
        if let Some(table) = self.fresh(service) {
            return Ok(table);
        }

        let built = match self.registry.fetch_instances(service).await {
            Ok(instances) => ServiceTable::build(&self.factory, &self.options, instances),
            Err(e) => Err(e),
        };

        match built {
            Ok(table) => {
                let table = Arc::new(table);
                debug!(service = %service, instances = table.instances().len(), "Refreshed service table");
                self.store(service, table.clone());
                self.observe(service, RefreshOutcome::Fresh);
                Ok(table)
            }
            Err(e) => {
                let stale = {
                    let mut entries = self.entries.write();
                    entries.get_mut(service).map(|entry| {
                        entry.expires_at = Instant::now() + self.config.ttl;
                        entry.table.clone()
                    })
                };
                match stale {
                    Some(table) => {
                        warn!(service = %service, error = %e, "Refresh failed, serving stale table");
                        self.observe(service, RefreshOutcome::Stale);
                        Ok(table)
                    }
                    None => {
                        warn!(service = %service, error = %e, "Refresh failed with nothing cached");
                        self.observe(service, RefreshOutcome::Failed);
                        Err(CoreError::ServiceUnavailable {
                            service: service.to_string(),
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }
    }

    fn observe(&self, service: &str, outcome: RefreshOutcome) {
        if let Some(observer) = &self.observer {
            observer(service, outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{StaticRegistry, WatcherConfig};
    use crate::router::RouteContext;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRegistry {
        inner: StaticRegistry,
        fetches: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl Registry for CountingRegistry {
        async fn fetch_instances(&self, service: &str) -> Result<Vec<Instance>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.inner.get(service).await
        }
    }

    async fn counting(delay: Duration) -> Arc<CountingRegistry> {
        let inner = StaticRegistry::new();
        inner
            .register_service(
                "users",
                vec![Instance::new("10.0.0.1", 80), Instance::new("10.0.0.2", 80)],
            )
            .await;
        Arc::new(CountingRegistry {
            inner,
            fetches: AtomicUsize::new(0),
            delay,
        })
    }

    fn cache(registry: Arc<dyn Registry>, ttl: Duration) -> DiscoveryCache {
        DiscoveryCache::new(
            registry,
            SelectorFactory::default(),
            TableOptions::default(),
            CacheConfig { ttl },
        )
    }

    #[tokio::test]
    async fn test_concurrent_loads_fetch_once() {
        let registry = counting(Duration::from_millis(50)).await;
        let cache = Arc::new(cache(registry.clone(), Duration::from_secs(10)));

        let mut handles = Vec::new();
        for _ in 0..100 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.load("users").await }));
        }
        for handle in handles {
            let table = handle.await.unwrap().unwrap();
            assert_eq!(table.instances().len(), 2);
        }
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 1);

        cache.load("users").await.unwrap();
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let registry = counting(Duration::ZERO).await;
        let cache = cache(registry.clone(), Duration::ZERO);

        cache.load("users").await.unwrap();
        cache.load("users").await.unwrap();
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stale_table_served_on_error() {
        let registry = counting(Duration::ZERO).await;
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let cache = cache(registry.clone(), Duration::ZERO).with_refresh_observer(Arc::new(
            move |_: &str, outcome: RefreshOutcome| sink.lock().push(outcome),
        ));

        cache.load("users").await.unwrap();
        registry.inner.deregister("users").await;

        let table = cache.load("users").await.unwrap();
        assert_eq!(table.instances().len(), 2);
        assert_eq!(
            *outcomes.lock(),
            vec![RefreshOutcome::Fresh, RefreshOutcome::Stale]
        );
    }

    #[tokio::test]
    async fn test_unknown_service_is_unavailable() {
        let registry = counting(Duration::ZERO).await;
        let cache = cache(registry, Duration::from_secs(10));
        assert!(matches!(
            cache.load("missing").await,
            Err(CoreError::ServiceUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_weights_keep_previous_table() {
        let registry = Arc::new(StaticRegistry::new());
        registry
            .register_service("users", vec![Instance::new("10.0.0.1", 80)])
            .await;
        let cache = DiscoveryCache::new(
            registry.clone(),
            SelectorFactory::default(),
            TableOptions {
                kind: crate::selector::SelectorKind::WeightedRoundRobin,
                ..Default::default()
            },
            CacheConfig {
                ttl: Duration::ZERO,
            },
        );

        cache.load("users").await.unwrap();
        registry
            .update(
                "users",
                vec![
                    Instance::new("10.0.0.1", 80).with_weight(0),
                    Instance::new("10.0.0.2", 80),
                ],
            )
            .await
            .unwrap();

        let table = cache.load("users").await.unwrap();
        assert_eq!(table.instances()[0].address, "10.0.0.1");
        assert_eq!(table.instances().len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_fetch() {
        let registry = counting(Duration::ZERO).await;
        let cache = cache(registry.clone(), Duration::from_secs(10));
        cache.load("users").await.unwrap();
        assert!(cache.invalidate("users"));
        assert!(!cache.invalidate("users"));
        cache.load("users").await.unwrap();
        assert_eq!(registry.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_follow_applies_watcher_events() {
        let registry = Arc::new(StaticRegistry::new());
        registry
            .register_service("users", vec![Instance::new("10.0.0.1", 80)])
            .await;
        let cache = Arc::new(DiscoveryCache::new(
            registry.clone(),
            SelectorFactory::default(),
            TableOptions::default(),
            CacheConfig::default(),
        ));
        let watcher = Watcher::new(registry.clone(), WatcherConfig::default());

        cache.follow(&watcher, "users").await.unwrap();
        assert_eq!(cache.cached_services(), vec!["users"]);

        registry
            .update("users", vec![Instance::new("10.0.0.7", 80)])
            .await
            .unwrap();
        watcher.poll_once().await;

        let table = cache.load("users").await.unwrap();
        let chosen = table.choose(&RouteContext::new()).unwrap();
        assert_eq!(chosen.address, "10.0.0.7");
    }
}
