//! Degenerate selectors for one-node and empty node sets

use crate::selector::Selector;
use crate::{CoreError, Node, Result};

/// Always returns its only node
#[derive(Debug)]
pub struct SingleSelector<T> {
    nodes: Vec<Node<T>>,
}

impl<T> SingleSelector<T> {
    pub fn new(nodes: Vec<Node<T>>) -> Result<Self> {
        if nodes.len() != 1 {
            return Err(CoreError::Internal(format!(
                "single selector built with {} nodes",
                nodes.len()
            )));
        }
        Ok(Self { nodes })
    }
}

impl<T: Send + Sync> Selector<T> for SingleSelector<T> {
    fn select(&self, _key: Option<&str>) -> Result<&Node<T>> {
        Ok(&self.nodes[0])
    }

    fn nodes(&self) -> &[Node<T>] {
        &self.nodes
    }
}

/// Fails every selection with a fixed error.
///
/// Stands in for a structurally empty partition so callers get a typed
/// failure instead of a missing selector.
#[derive(Debug)]
pub struct ErrorSelector {
    error: CoreError,
}

impl ErrorSelector {
    pub fn new(error: CoreError) -> Self {
        Self { error }
    }
}

impl<T> Selector<T> for ErrorSelector {
    fn select(&self, _key: Option<&str>) -> Result<&Node<T>> {
        Err(self.error.clone())
    }

    fn nodes(&self) -> &[Node<T>] {
        &[]
    }
}
