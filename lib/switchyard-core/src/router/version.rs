//! Version-partitioned routing table

use std::collections::HashMap;
use std::sync::Arc;

use switchyard_api::DEFAULT_VERSION;
use tracing::debug;

use crate::router::RouteContext;
use crate::selector::{Selector, SelectorFactory, SelectorKind};
use crate::{Node, Result};

/// One selector per version tag plus the `"default"` aggregate.
///
/// The default partition holds every node, tagged or not, so an unknown or
/// absent version degrades to it instead of failing. The table is immutable
/// once built.
pub struct VersionRouter<T> {
    partitions: HashMap<String, Arc<dyn Selector<T>>>,
    local_version: String,
}

impl<T: Clone + Send + Sync + 'static> VersionRouter<T> {
    /// Build from `(version, node)` pairs; `local_version` is this process's
    /// own version, used when a request does not ask for one.
    pub fn build(
        factory: &SelectorFactory,
        kind: SelectorKind,
        local_version: &str,
        nodes: Vec<(String, Node<T>)>,
    ) -> Result<Self> {
        let mut groups: HashMap<String, Vec<Node<T>>> = HashMap::new();
        groups.entry(DEFAULT_VERSION.to_string()).or_default();

        for (version, node) in nodes {
            if !version.is_empty() && version != DEFAULT_VERSION {
                groups.entry(version).or_default().push(node.clone());
            }
            groups
                .entry(DEFAULT_VERSION.to_string())
                .or_default()
                .push(node);
        }

        let mut partitions = HashMap::with_capacity(groups.len());
        for (version, nodes) in groups {
            partitions.insert(version, factory.build(kind, nodes)?);
        }

        Ok(Self {
            partitions,
            local_version: local_version.to_string(),
        })
    }
}

impl<T> VersionRouter<T> {
    /// Resolve the partition name: request version, then process version,
    /// then `"default"`.
    pub fn resolve_version<'a>(&'a self, ctx: &'a RouteContext) -> &'a str {
        match ctx.version.as_deref() {
            Some(version) if !version.is_empty() => version,
            _ if !self.local_version.is_empty() => self.local_version.as_str(),
            _ => DEFAULT_VERSION,
        }
    }

    /// Pick a node for the request, retrying once on the default partition
    pub fn choose(&self, ctx: &RouteContext) -> Result<&Node<T>> {
        let version = self.resolve_version(ctx);
        let key = ctx.hash_key();

        if version != DEFAULT_VERSION {
            if let Some(selector) = self.partitions.get(version) {
                match selector.select(key) {
                    Ok(node) => return Ok(node),
                    Err(e) => {
                        debug!(version = %version, error = %e, "Partition select failed, using default");
                    }
                }
            }
        }

        self.default_partition().select(key)
    }

    pub fn partition(&self, version: &str) -> Option<&Arc<dyn Selector<T>>> {
        self.partitions.get(version)
    }

    pub fn default_partition(&self) -> &Arc<dyn Selector<T>> {
        &self.partitions[DEFAULT_VERSION]
    }

    pub fn versions(&self) -> Vec<&str> {
        let mut versions: Vec<&str> = self.partitions.keys().map(String::as_str).collect();
        versions.sort_unstable();
        versions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;

    fn tagged(items: &[(&str, &str)]) -> Vec<(String, Node<String>)> {
        items
            .iter()
            .map(|(id, version)| (version.to_string(), Node::new(*id, id.to_string(), 1)))
            .collect()
    }

    fn ids(selector: &Arc<dyn Selector<String>>) -> Vec<String> {
        let mut ids: Vec<String> = selector.nodes().iter().map(|n| n.id.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_default_partition_holds_every_node() {
        let router = VersionRouter::build(
            &SelectorFactory::default(),
            SelectorKind::RoundRobin,
            "",
            tagged(&[("a1", "a"), ("b1", "b"), ("d1", "")]),
        )
        .unwrap();

        assert_eq!(router.versions(), vec!["a", "b", "default"]);
        assert_eq!(ids(router.default_partition()), vec!["a1", "b1", "d1"]);
        assert_eq!(ids(router.partition("a").unwrap()), vec!["a1"]);
    }

    #[test]
    fn test_unknown_version_resolves_to_default() {
        let router = VersionRouter::build(
            &SelectorFactory::default(),
            SelectorKind::RoundRobin,
            "",
            tagged(&[("a1", "a"), ("b1", "b"), ("d1", "")]),
        )
        .unwrap();

        let ctx = RouteContext::new().with_version("c");
        for _ in 0..6 {
            assert!(router.choose(&ctx).is_ok());
        }
    }

    #[test]
    fn test_requested_version_wins() {
        let router = VersionRouter::build(
            &SelectorFactory::default(),
            SelectorKind::RoundRobin,
            "",
            tagged(&[("a1", "a"), ("b1", "b"), ("d1", "")]),
        )
        .unwrap();

        let ctx = RouteContext::new().with_version("b");
        for _ in 0..4 {
            assert_eq!(router.choose(&ctx).unwrap().id, "b1");
        }
    }

    #[test]
    fn test_local_version_fallback() {
        let router = VersionRouter::build(
            &SelectorFactory::default(),
            SelectorKind::RoundRobin,
            "a",
            tagged(&[("a1", "a"), ("d1", "")]),
        )
        .unwrap();

        assert_eq!(router.resolve_version(&RouteContext::new()), "a");
        assert_eq!(router.choose(&RouteContext::new()).unwrap().id, "a1");
        assert_eq!(
            router.resolve_version(&RouteContext::new().with_version("x")),
            "x"
        );
    }

    #[test]
    fn test_empty_router_reports_empty_nodes() {
        let router: VersionRouter<String> = VersionRouter::build(
            &SelectorFactory::default(),
            SelectorKind::RoundRobin,
            "",
            Vec::new(),
        )
        .unwrap();
        assert_eq!(router.choose(&RouteContext::new()).err(), Some(CoreError::EmptyNodes));
    }
}
