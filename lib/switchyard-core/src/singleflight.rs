//! Collapse concurrent calls for the same key into one execution

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Concurrent callers of [`SingleFlight::run`] with an equal key share the
/// result of a single invocation.
///
/// If the leading caller is dropped before finishing, one of the waiting
/// callers takes over and runs its own closure.
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, watch::Receiver<Option<V>>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let tx = loop {
            let mut rx = {
                let mut calls = self.calls.lock();
                match calls.get(&key) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        calls.insert(key.clone(), rx);
                        break tx;
                    }
                }
            };

            if let Ok(value) = rx.wait_for(Option::is_some).await {
                if let Some(value) = &*value {
                    return value.clone();
                }
            };
            // leader went away without a result
        };

        let _guard = FlightGuard {
            calls: &self.calls,
            key,
        };
        let value = f().await;
        tx.send_replace(Some(value.clone()));
        value
    }

    /// Number of keys with a call in progress
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

struct FlightGuard<'a, K: Eq + Hash, V> {
    calls: &'a Mutex<HashMap<K, watch::Receiver<Option<V>>>>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        self.calls.lock().remove(&self.key);
    }
}
