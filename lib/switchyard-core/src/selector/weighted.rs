//! GCD-based weighted round robin

use parking_lot::Mutex;

use crate::selector::Selector;
use crate::{CoreError, Node, Result};

/// Weighted round robin that interleaves heavy nodes with light ones
/// instead of sending a burst of requests to the heaviest node.
#[derive(Debug)]
pub struct WeightedRoundRobinSelector<T> {
    nodes: Vec<Node<T>>,
    gcd: u64,
    max_weight: u64,
    state: Mutex<Cursor>,
}

#[derive(Debug)]
struct Cursor {
    index: usize,
    threshold: u64,
}

impl<T> WeightedRoundRobinSelector<T> {
    pub fn new(nodes: Vec<Node<T>>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(CoreError::EmptyNodes);
        }
        if let Some(node) = nodes.iter().find(|n| n.weight == 0) {
            return Err(CoreError::InvalidWeight {
                id: node.id.clone(),
                weight: node.weight,
            });
        }

        let gcd = nodes.iter().map(|n| n.weight as u64).fold(0, gcd);
        let max_weight = nodes.iter().map(|n| n.weight as u64).max().unwrap_or(1);
        let last = nodes.len() - 1;

        Ok(Self {
            nodes,
            gcd,
            max_weight,
            // Start just before node 0 with a spent threshold so the first
            // call wraps and resets to the maximum weight.
            state: Mutex::new(Cursor {
                index: last,
                threshold: 0,
            }),
        })
    }

    fn next_index(&self) -> usize {
        let len = self.nodes.len();
        let mut cursor = self.state.lock();
        loop {
            cursor.index = (cursor.index + 1) % len;
            if cursor.index == 0 {
                cursor.threshold = cursor.threshold.saturating_sub(self.gcd);
                if cursor.threshold == 0 {
                    cursor.threshold = self.max_weight;
                }
            }
            if self.nodes[cursor.index].weight as u64 >= cursor.threshold {
                return cursor.index;
            }
        }
    }
}

impl<T: Send + Sync> Selector<T> for WeightedRoundRobinSelector<T> {
    fn select(&self, _key: Option<&str>) -> Result<&Node<T>> {
        Ok(&self.nodes[self.next_index()])
    }

    fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
