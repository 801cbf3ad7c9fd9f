//! Core load balancing and service discovery
//!
//! This library provides:
//! - Node selectors (round robin, weighted round robin, consistent hashing)
//! - Version and locality partitioned routing tables
//! - A TTL discovery cache in front of a service registry
//! - A watcher that polls the registry and publishes membership changes

pub mod discovery;
pub mod error;
pub mod node;
pub mod router;
pub mod selector;
pub mod singleflight;

pub use discovery::{
    CacheConfig, ChangeEvent, DiscoveryCache, RefreshObserver, RefreshOutcome, Registry,
    StaticRegistry, SubscriptionId, Watcher, WatcherConfig,
};
pub use error::{CoreError, Result};
pub use node::Node;
pub use router::{Locality, RouteContext, ServiceTable, TableOptions};
pub use selector::{Selector, SelectorFactory, SelectorKind};
pub use singleflight::SingleFlight;
