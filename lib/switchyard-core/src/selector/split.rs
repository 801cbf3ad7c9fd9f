//! Master/slave split over one node list

use std::sync::Arc;

use crate::selector::{Selector, SelectorFactory, SelectorKind};
use crate::{CoreError, Node, Result};

/// Separate selectors for write (master) and read (slave) traffic.
///
/// An empty side is backed by an error selector, so selecting from it fails
/// with [`CoreError::EmptyNodes`].
pub struct ReadWriteSplit<T> {
    master: Arc<dyn Selector<T>>,
    slave: Arc<dyn Selector<T>>,
}

impl<T: Send + Sync + 'static> ReadWriteSplit<T> {
    pub fn build<F>(
        factory: &SelectorFactory,
        kind: SelectorKind,
        nodes: Vec<Node<T>>,
        is_master: F,
    ) -> Result<Self>
    where
        F: Fn(&Node<T>) -> bool,
    {
        let (masters, slaves): (Vec<_>, Vec<_>) = nodes.into_iter().partition(|n| is_master(n));
        Ok(Self {
            master: factory.build(kind, masters)?,
            slave: factory.build(kind, slaves)?,
        })
    }

    pub fn select_write(&self, key: Option<&str>) -> Result<&Node<T>> {
        self.master.select(key)
    }

    /// Select a slave, falling back to the master side when there are none
    pub fn select_read(&self, key: Option<&str>) -> Result<&Node<T>> {
        match self.slave.select(key) {
            Err(CoreError::EmptyNodes) => self.master.select(key),
            other => other,
        }
    }
}
