//! Node selection algorithms
//!
//! Every algorithm implements [`Selector`]. Selectors are built once from an
//! immutable node list and shared behind `Arc` by all request tasks.

pub mod hash;
pub mod round_robin;
pub mod single;
pub mod split;
pub mod weighted;

use std::sync::Arc;

use switchyard_api::LbPolicy;

use crate::{CoreError, Node, Result};

pub use hash::{HashFunction, HashSelector, NO_KEY_SENTINEL};
pub use round_robin::RoundRobinSelector;
pub use single::{ErrorSelector, SingleSelector};
pub use split::ReadWriteSplit;
pub use weighted::WeightedRoundRobinSelector;

/// Picks one node out of a fixed node list
pub trait Selector<T>: Send + Sync {
    /// Select a node; `key` is only consulted by hash-based selectors
    fn select(&self, key: Option<&str>) -> Result<&Node<T>>;

    /// The node list this selector was built from
    fn nodes(&self) -> &[Node<T>];
}

/// The closed set of selection algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    RoundRobin,
    WeightedRoundRobin,
    Hash(HashFunction),
}

/// Builds selectors; passed explicitly to routers and caches instead of a
/// process-wide constructor table.
#[derive(Clone, Debug)]
pub struct SelectorFactory {
    hash_function: HashFunction,
}

impl SelectorFactory {
    pub fn new(hash_function: HashFunction) -> Self {
        Self { hash_function }
    }

    pub fn hash_function(&self) -> HashFunction {
        self.hash_function
    }

    /// Map a configured policy to a selector kind
    pub fn kind_for(&self, policy: LbPolicy) -> SelectorKind {
        match policy {
            LbPolicy::RoundRobin => SelectorKind::RoundRobin,
            LbPolicy::WeightedRoundRobin => SelectorKind::WeightedRoundRobin,
            LbPolicy::HashPolicy => SelectorKind::Hash(self.hash_function),
        }
    }

    /// Build a selector of `kind` over `nodes`.
    ///
    /// An empty list yields an [`ErrorSelector`] and a single node yields a
    /// [`SingleSelector`], whatever the requested kind.
    pub fn build<T>(&self, kind: SelectorKind, nodes: Vec<Node<T>>) -> Result<Arc<dyn Selector<T>>>
    where
        T: Send + Sync + 'static,
    {
        if kind == SelectorKind::WeightedRoundRobin {
            if let Some(node) = nodes.iter().find(|n| n.weight == 0) {
                return Err(CoreError::InvalidWeight {
                    id: node.id.clone(),
                    weight: node.weight,
                });
            }
        }

        let selector: Arc<dyn Selector<T>> = match nodes.len() {
            0 => Arc::new(ErrorSelector::new(CoreError::EmptyNodes)),
            1 => Arc::new(SingleSelector::new(nodes)?),
            _ => match kind {
                SelectorKind::RoundRobin => Arc::new(RoundRobinSelector::new(nodes)),
                SelectorKind::WeightedRoundRobin => Arc::new(WeightedRoundRobinSelector::new(nodes)?),
                SelectorKind::Hash(function) => Arc::new(HashSelector::new(nodes, function)),
            },
        };
        Ok(selector)
    }
}

impl Default for SelectorFactory {
    fn default() -> Self {
        Self::new(HashFunction::Crc32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(weights: &[u32]) -> Vec<Node<usize>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| Node::new(format!("n{}", i), i, *w))
            .collect()
    }

    #[test]
    fn test_empty_list_builds_error_selector() {
        let factory = SelectorFactory::default();
        let selector = factory.build(SelectorKind::RoundRobin, nodes(&[])).unwrap();
        assert_eq!(selector.select(None), Err(CoreError::EmptyNodes));
        assert!(selector.nodes().is_empty());
    }

    #[test]
    fn test_single_node_short_circuit() {
        let factory = SelectorFactory::default();
        let selector = factory
            .build(SelectorKind::Hash(HashFunction::Murmur3), nodes(&[3]))
            .unwrap();
        for key in ["a", "b", "c"] {
            assert_eq!(selector.select(Some(key)).unwrap().id, "n0");
        }
    }

    #[test]
    fn test_weighted_rejects_zero_weight() {
        let factory = SelectorFactory::default();
        let err = factory
            .build(SelectorKind::WeightedRoundRobin, nodes(&[2, 0]))
            .err()
            .unwrap();
        assert_eq!(err, CoreError::InvalidWeight { id: "n1".to_string(), weight: 0 });
    }

    #[test]
    fn test_kind_for_policy() {
        let factory = SelectorFactory::new(HashFunction::Fnv1a);
        assert_eq!(factory.kind_for(LbPolicy::RoundRobin), SelectorKind::RoundRobin);
        assert_eq!(
            factory.kind_for(LbPolicy::HashPolicy),
            SelectorKind::Hash(HashFunction::Fnv1a)
        );
    }
}
