//! Round-robin selection

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::selector::Selector;
use crate::{CoreError, Node, Result};

/// Round-robin selector.
///
/// The counter starts at a random offset so that restarted processes do not
/// all hit the first node together.
#[derive(Debug)]
pub struct RoundRobinSelector<T> {
    nodes: Vec<Node<T>>,
    counter: AtomicUsize,
}

impl<T> RoundRobinSelector<T> {
    pub fn new(nodes: Vec<Node<T>>) -> Self {
        let seed = if nodes.is_empty() {
            0
        } else {
            rand::thread_rng().gen_range(0..nodes.len())
        };
        Self::with_seed(nodes, seed)
    }

    pub fn with_seed(nodes: Vec<Node<T>>, seed: usize) -> Self {
        Self {
            nodes,
            counter: AtomicUsize::new(seed),
        }
    }
}

impl<T: Send + Sync> Selector<T> for RoundRobinSelector<T> {
    fn select(&self, _key: Option<&str>) -> Result<&Node<T>> {
        if self.nodes.is_empty() {
            return Err(CoreError::EmptyNodes);
        }
        let current = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(&self.nodes[current % self.nodes.len()])
    }

    fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }
}
