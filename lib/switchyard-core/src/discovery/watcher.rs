//! Periodic polling of watched services with change detection

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use switchyard_api::Instance;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::discovery::notify::{ChangeCallback, ChangeEvent, Notifier, SubscriptionId};
use crate::discovery::Registry;
use crate::Result;

#[derive(Clone, Debug)]
pub struct WatcherConfig {
    pub interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Polls the registry for every watched service and publishes a
/// [`ChangeEvent`] whenever the instance set of a service differs from the
/// last one seen.
///
/// Lists are compared sorted, so a registry returning the same instances in
/// another order does not produce an event.
pub struct Watcher {
    registry: Arc<dyn Registry>,
    notifier: Notifier,
    config: WatcherConfig,
    known: Mutex<HashMap<String, Vec<Instance>>>,
}

impl Watcher {
    pub fn new(registry: Arc<dyn Registry>, config: WatcherConfig) -> Self {
        Self {
            registry,
            notifier: Notifier::new(),
            config,
            known: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to changes of `service`.
    ///
    /// The current instance list is fetched right away and handed to the
    /// callback before this returns. If that first fetch fails the
    /// subscription is dropped and the error returned.
    pub async fn on_change(
        &self,
        service: &str,
        callback: ChangeCallback,
    ) -> Result<SubscriptionId> {
        let id = self.notifier.subscribe(service, callback.clone());

        let mut instances = match self.registry.fetch_instances(service).await {
            Ok(instances) => instances,
            Err(e) => {
                self.notifier.unsubscribe(id);
                return Err(e);
            }
        };
        instances.sort();

        self.known
            .lock()
            .insert(service.to_string(), instances.clone());
        callback(&ChangeEvent::new(service, instances));

        debug!(service = %service, subscription = %id, "Subscribed to service changes");
        Ok(id)
    }

    /// Add a service to the poll set without subscribing
    pub fn watch(&self, service: &str) {
        self.known.lock().entry(service.to_string()).or_default();
    }

    /// Stop polling a service; existing subscriptions stay registered
    pub fn unwatch(&self, service: &str) {
        self.known.lock().remove(service);
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    /// Watched service names, sorted
    pub fn watched(&self) -> Vec<String> {
        let mut names: Vec<String> = self.known.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Poll every watched service once and publish the changes.
    ///
    /// Returns the number of services that changed. A failed fetch leaves the
    /// last known list in place.
    pub async fn poll_once(&self) -> usize {
        let names: Vec<String> = self.known.lock().keys().cloned().collect();

        let results = join_all(
            names
                .iter()
                .map(|name| self.registry.fetch_instances(name)),
        )
        .await;

        let mut events = Vec::new();
        {
            let mut known = self.known.lock();
            for (name, result) in names.into_iter().zip(results) {
                match result {
                    Ok(mut instances) => {
                        instances.sort();
                        // skipped when unwatched while the fetch was in flight
                        if let Some(previous) = known.get_mut(&name) {
                            if *previous != instances {
                                *previous = instances.clone();
                                events.push(ChangeEvent::new(name, instances));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(service = %name, error = %e, "Failed to poll service");
                    }
                }
            }
        }

        for event in &events {
            info!(
                service = %event.service,
                instances = event.instances.len(),
                "Service instances changed"
            );
            self.notifier.publish(event);
        }
        events.len()
    }

    /// Run [`Watcher::poll_once`] on the configured interval until the
    /// returned task is aborted.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let changed = self.poll_once().await;
                debug!(changed, "Watcher poll complete");
            }
        })
    }
}
