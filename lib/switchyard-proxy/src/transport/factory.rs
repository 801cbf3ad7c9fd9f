//! Builds transports from validated routes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hyper::header::HeaderName;
use parking_lot::Mutex;
use switchyard_api::{RouteSpec, Target};
use switchyard_core::{
    CacheConfig, DiscoveryCache, Locality, Node, RefreshObserver, Registry, SelectorFactory,
    SelectorKind, TableOptions, Watcher,
};
use tracing::{info, warn};

use crate::policy::TrafficPolicy;
use crate::transport::{
    Executors, HttpExecutor, StreamExecutor, TargetResolver, Transport, TransportTarget, Upstream,
};
use crate::Result;

#[derive(Clone, Debug)]
pub struct TransportOptions {
    /// Header carrying the requested instance version
    pub version_header: HeaderName,
    /// Version this gateway prefers when a request names none
    pub local_version: String,
    pub locality: Option<Locality>,
    pub traffic: TrafficPolicy,
    pub cache: CacheConfig,
    /// How long a streaming route waits for the upstream response head
    pub stream_header_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            version_header: HeaderName::from_static("x-version"),
            local_version: String::new(),
            locality: None,
            traffic: TrafficPolicy::default(),
            cache: CacheConfig::default(),
            stream_header_timeout: Duration::from_secs(30),
        }
    }
}

/// Turns route specs into transports.
///
/// Discovery routes with the same selector kind share one
/// [`DiscoveryCache`], so a service is fetched once however many routes
/// point at it.
pub struct TransportFactory {
    registry: Arc<dyn Registry>,
    selectors: SelectorFactory,
    options: TransportOptions,
    executors: Arc<Executors>,
    observer: Option<RefreshObserver>,
    caches: Mutex<HashMap<SelectorKind, Arc<DiscoveryCache>>>,
    followed: Mutex<Vec<(Arc<DiscoveryCache>, String)>>,
}

impl TransportFactory {
    pub fn new(registry: Arc<dyn Registry>, options: TransportOptions) -> Self {
        let executors = Arc::new(Executors {
            version_header: options.version_header.clone(),
            http: HttpExecutor::new(options.traffic.clone()),
            stream: StreamExecutor::new(
                options.traffic.timeout.connect_timeout,
                options.stream_header_timeout,
            ),
        });
        Self {
            registry,
            selectors: SelectorFactory::default(),
            options,
            executors,
            observer: None,
            caches: Mutex::new(HashMap::new()),
            followed: Mutex::new(Vec::new()),
        }
    }

    pub fn with_selector_factory(mut self, selectors: SelectorFactory) -> Self {
        self.selectors = selectors;
        self
    }

    /// Report every discovery refresh, e.g. to metrics
    pub fn with_refresh_observer(mut self, observer: RefreshObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    pub fn build(&self, name: impl Into<String>, spec: &RouteSpec) -> Result<Transport> {
        let target = match &spec.target {
            Target::Mock(mock) => TransportTarget::Mock(mock.clone()),
            Target::Domain {
                targets,
                lb_policy,
                hash_header,
            } => {
                let nodes = targets
                    .iter()
                    .map(|t| Ok(Node::new(t.target.clone(), Upstream::parse(&t.target)?, t.weight)))
                    .collect::<Result<Vec<_>>>()?;
                let selector = self.selectors.build(self.selectors.kind_for(*lb_policy), nodes)?;
                TransportTarget::Forward(TargetResolver::Static {
                    selector,
                    hash_header: hash_header.clone(),
                })
            }
            Target::Discovery {
                service_name,
                lb_policy,
                hash_header,
            } => {
                let cache = self.cache_for(self.selectors.kind_for(*lb_policy));
                self.track(&cache, service_name);
                TransportTarget::Forward(TargetResolver::Discovery {
                    cache,
                    service: service_name.clone(),
                    hash_header: hash_header.clone(),
                })
            }
        };

        Ok(Transport::new(
            name,
            spec.target.target_type(),
            spec.rewrite.clone(),
            target,
            self.executors.clone(),
        ))
    }

    /// The shared cache for one selector kind, created on first use
    pub fn cache_for(&self, kind: SelectorKind) -> Arc<DiscoveryCache> {
        self.caches
            .lock()
            .entry(kind)
            .or_insert_with(|| {
                let options = TableOptions {
                    kind,
                    local_version: self.options.local_version.clone(),
                    locality: self.options.locality.clone(),
                };
                let cache = DiscoveryCache::new(
                    self.registry.clone(),
                    self.selectors.clone(),
                    options,
                    self.options.cache.clone(),
                );
                let cache = match &self.observer {
                    Some(observer) => cache.with_refresh_observer(observer.clone()),
                    None => cache,
                };
                Arc::new(cache)
            })
            .clone()
    }

    fn track(&self, cache: &Arc<DiscoveryCache>, service: &str) {
        let mut followed = self.followed.lock();
        let known = followed
            .iter()
            .any(|(c, s)| Arc::ptr_eq(c, cache) && s == service);
        if !known {
            followed.push((cache.clone(), service.to_string()));
        }
    }

    /// Services referenced by discovery routes, sorted and deduplicated
    pub fn discovery_services(&self) -> Vec<String> {
        let mut services: Vec<String> = self
            .followed
            .lock()
            .iter()
            .map(|(_, service)| service.clone())
            .collect();
        services.sort();
        services.dedup();
        services
    }

    /// Push watcher changes into every cache a discovery route uses.
    ///
    /// Returns how many subscriptions were made; services whose first
    /// fetch fails are logged and left to the cache's lazy loading.
    pub async fn follow_discovery(&self, watcher: &Watcher) -> usize {
        let followed: Vec<(Arc<DiscoveryCache>, String)> = self.followed.lock().clone();
        let mut subscribed = 0;
        for (cache, service) in followed {
            match cache.follow(watcher, &service).await {
                Ok(id) => {
                    info!(service = %service, subscription = %id, "Following service changes");
                    subscribed += 1;
                }
                Err(e) => {
                    warn!(service = %service, error = %e, "Failed to follow service");
                }
            }
        }
        subscribed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_api::{Instance, LbPolicy, Rewrite, TargetConfig, TargetType};
    use switchyard_core::{StaticRegistry, WatcherConfig};

    fn discovery(service: &str, lb_policy: LbPolicy) -> RouteSpec {
        RouteSpec {
            match_type: switchyard_api::MatchType::PrefixMatch,
            path: format!("/{}", service),
            expr: None,
            priority: 0,
            target: Target::Discovery {
                service_name: service.to_string(),
                lb_policy,
                hash_header: None,
            },
            rewrite: Rewrite::CopyFullPath,
        }
    }

    async fn factory() -> (Arc<StaticRegistry>, TransportFactory) {
        let registry = Arc::new(StaticRegistry::new());
        registry
            .register_service("users", vec![Instance::new("10.0.0.1", 8080)])
            .await;
        let factory = TransportFactory::new(registry.clone(), TransportOptions::default());
        (registry, factory)
    }

    #[tokio::test]
    async fn test_discovery_routes_share_cache_per_kind() {
        let (_, factory) = factory().await;
        factory.build("a", &discovery("users", LbPolicy::RoundRobin)).unwrap();
        factory.build("b", &discovery("users", LbPolicy::RoundRobin)).unwrap();
        factory.build("c", &discovery("orders", LbPolicy::HashPolicy)).unwrap();

        assert!(Arc::ptr_eq(
            &factory.cache_for(SelectorKind::RoundRobin),
            &factory.cache_for(SelectorKind::RoundRobin)
        ));
        assert_eq!(factory.discovery_services(), vec!["orders", "users"]);
        assert_eq!(factory.followed.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_domain_route_builds_static_resolver() {
        let (_, factory) = factory().await;
        let spec = RouteSpec {
            target: Target::Domain {
                targets: vec![
                    TargetConfig {
                        target: "127.0.0.1:9001".to_string(),
                        weight: 1,
                    },
                    TargetConfig {
                        target: "127.0.0.1:9002".to_string(),
                        weight: 1,
                    },
                ],
                lb_policy: LbPolicy::WeightedRoundRobin,
                hash_header: None,
            },
            ..discovery("host", LbPolicy::RoundRobin)
        };
        let transport = factory.build("/host", &spec).unwrap();
        assert_eq!(transport.target_type(), TargetType::Domain);
        match transport.target() {
            TransportTarget::Forward(resolver) => assert!(!resolver.is_discovery()),
            TransportTarget::Mock(_) => panic!("expected forwarding target"),
        }
    }

    #[tokio::test]
    async fn test_bad_domain_target_rejected() {
        let (_, factory) = factory().await;
        let spec = RouteSpec {
            target: Target::Domain {
                targets: vec![TargetConfig {
                    target: "not a host".to_string(),
                    weight: 1,
                }],
                lb_policy: LbPolicy::RoundRobin,
                hash_header: None,
            },
            ..discovery("host", LbPolicy::RoundRobin)
        };
        assert!(factory.build("/host", &spec).is_err());
    }

    #[tokio::test]
    async fn test_follow_discovery_skips_unknown_services() {
        let (registry, factory) = factory().await;
        factory.build("a", &discovery("users", LbPolicy::RoundRobin)).unwrap();
        factory.build("b", &discovery("missing", LbPolicy::RoundRobin)).unwrap();

        let watcher = Watcher::new(registry, WatcherConfig::default());
        assert_eq!(factory.follow_discovery(&watcher).await, 1);
        assert_eq!(watcher.watched(), vec!["users"]);
    }
}
