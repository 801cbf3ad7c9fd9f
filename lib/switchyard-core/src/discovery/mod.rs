//! Service discovery: registry access, cached routing tables, change watching

pub mod cache;
pub mod notify;
pub mod registry;
pub mod watcher;

pub use cache::{CacheConfig, DiscoveryCache, RefreshObserver, RefreshOutcome};
pub use notify::{ChangeCallback, ChangeEvent, Notifier, SubscriptionId};
pub use registry::{Registry, StaticRegistry};
pub use watcher::{Watcher, WatcherConfig};
