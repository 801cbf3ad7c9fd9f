//! Change notifications for watched services

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use switchyard_api::Instance;
use uuid::Uuid;

/// The new instance list of a service whose membership changed
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    pub service: String,
    pub instances: Arc<Vec<Instance>>,
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(service: impl Into<String>, instances: Vec<Instance>) -> Self {
        Self {
            service: service.into(),
            instances: Arc::new(instances),
            observed_at: Utc::now(),
        }
    }
}

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Handle returned by [`Notifier::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-service fan-out of change events.
///
/// Callbacks run on the publishing task, outside the subscriber lock, so a
/// callback may itself subscribe or unsubscribe.
#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, ChangeCallback)>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, service: &str, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscribers
            .lock()
            .entry(service.to_string())
            .or_default()
            .push((id, callback));
        id
    }

    /// Returns whether the subscription existed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let mut found = false;
        subscribers.retain(|_, callbacks| {
            let before = callbacks.len();
            callbacks.retain(|(sub, _)| *sub != id);
            found |= callbacks.len() != before;
            !callbacks.is_empty()
        });
        found
    }

    /// Deliver an event to every subscriber of its service
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let callbacks: Vec<ChangeCallback> = self
            .subscribers
            .lock()
            .get(&event.service)
            .map(|subs| subs.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();

        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn subscriber_count(&self, service: &str) -> usize {
        self.subscribers
            .lock()
            .get(service)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> ChangeCallback {
        let counter = counter.clone();
        Arc::new(move |_: &ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_publish_reaches_only_matching_service() {
        let notifier = Notifier::new();
        let users = Arc::new(AtomicUsize::new(0));
        let orders = Arc::new(AtomicUsize::new(0));
        notifier.subscribe("users", counting(&users));
        notifier.subscribe("orders", counting(&orders));

        assert_eq!(notifier.publish(&ChangeEvent::new("users", Vec::new())), 1);
        assert_eq!(users.load(Ordering::SeqCst), 1);
        assert_eq!(orders.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier = Notifier::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = notifier.subscribe("users", counting(&counter));
        assert_eq!(notifier.subscriber_count("users"), 1);

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.publish(&ChangeEvent::new("users", Vec::new()));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(notifier.subscriber_count("users"), 0);
    }

    #[test]
    fn test_callback_may_resubscribe() {
        let notifier = Arc::new(Notifier::new());
        let inner = notifier.clone();
        notifier.subscribe(
            "users",
            Arc::new(move |_: &ChangeEvent| {
                inner.subscribe("users", Arc::new(|_: &ChangeEvent| {}));
            }),
        );
        notifier.publish(&ChangeEvent::new("users", Vec::new()));
        assert_eq!(notifier.subscriber_count("users"), 2);
    }
}
