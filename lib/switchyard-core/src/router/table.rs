//! Ready-to-query routing table for one discovered service

use switchyard_api::{Instance, DEFAULT_VERSION};

use crate::router::{Locality, NearbyRouter, RouteContext, VersionRouter};
use crate::selector::{SelectorFactory, SelectorKind};
use crate::{Node, Result};

/// How tables are built for a service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableOptions {
    pub kind: SelectorKind,
    /// This process's own version, the fallback when a request names none
    pub local_version: String,
    /// Set to enable zone/region-preferring routing
    pub locality: Option<Locality>,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            kind: SelectorKind::RoundRobin,
            local_version: String::new(),
            locality: None,
        }
    }
}

enum TableRouter {
    Versioned(VersionRouter<Instance>),
    Nearby(NearbyRouter<Instance>),
}

/// The partitioned router table published by the discovery cache.
///
/// Built fresh on every refresh and swapped in whole; never edited.
pub struct ServiceTable {
    instances: Vec<Instance>,
    router: TableRouter,
}

impl ServiceTable {
    pub fn build(
        factory: &SelectorFactory,
        options: &TableOptions,
        instances: Vec<Instance>,
    ) -> Result<Self> {
        let instances: Vec<Instance> = instances
            .into_iter()
            .map(|mut instance| {
                if instance.version.is_empty() {
                    instance.version = DEFAULT_VERSION.to_string();
                }
                instance
            })
            .collect();

        let router = match &options.locality {
            None => {
                let nodes = instances
                    .iter()
                    .map(|i| (i.version.clone(), to_node(i)))
                    .collect();
                TableRouter::Versioned(VersionRouter::build(
                    factory,
                    options.kind,
                    &options.local_version,
                    nodes,
                )?)
            }
            Some(local) => {
                let nodes = instances
                    .iter()
                    .map(|i| {
                        (
                            i.version.clone(),
                            Locality::new(i.region.clone(), i.zone.clone()),
                            to_node(i),
                        )
                    })
                    .collect();
                TableRouter::Nearby(NearbyRouter::build(
                    factory,
                    options.kind,
                    &options.local_version,
                    local.clone(),
                    nodes,
                )?)
            }
        };

        Ok(Self { instances, router })
    }

    /// Pick an instance for the request
    pub fn choose(&self, ctx: &RouteContext) -> Result<&Instance> {
        let node = match &self.router {
            TableRouter::Versioned(router) => router.choose(ctx)?,
            TableRouter::Nearby(router) => router.choose(ctx)?,
        };
        Ok(&node.data)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

fn to_node(instance: &Instance) -> Node<Instance> {
    Node::new(instance.authority(), instance.clone(), instance.weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CoreError;

    #[test]
    fn test_versioned_table() {
        let table = ServiceTable::build(
            &SelectorFactory::default(),
            &TableOptions::default(),
            vec![
                Instance::new("10.0.0.1", 80).with_version("a"),
                Instance::new("10.0.0.2", 80).with_version("b"),
                Instance::new("10.0.0.3", 80),
            ],
        )
        .unwrap();

        assert_eq!(table.instances()[2].version, "default");
        let ctx = RouteContext::new().with_version("a");
        assert_eq!(table.choose(&ctx).unwrap().address, "10.0.0.1");
        assert!(table.choose(&RouteContext::new().with_version("c")).is_ok());
    }

    #[test]
    fn test_nearby_table() {
        let options = TableOptions {
            locality: Some(Locality::new("eu", "eu-1")),
            ..Default::default()
        };
        let table = ServiceTable::build(
            &SelectorFactory::default(),
            &options,
            vec![
                Instance::new("10.0.0.1", 80).with_locality("us", "us-1"),
                Instance::new("10.0.0.2", 80).with_locality("eu", "eu-1"),
            ],
        )
        .unwrap();
        for _ in 0..3 {
            assert_eq!(table.choose(&RouteContext::new()).unwrap().address, "10.0.0.2");
        }
    }

    #[test]
    fn test_empty_table() {
        let table =
            ServiceTable::build(&SelectorFactory::default(), &TableOptions::default(), Vec::new())
                .unwrap();
        assert!(table.is_empty());
        assert_eq!(table.choose(&RouteContext::new()).err(), Some(CoreError::EmptyNodes));
    }

    #[test]
    fn test_weighted_table_rejects_zero_weight() {
        let options = TableOptions {
            kind: SelectorKind::WeightedRoundRobin,
            ..Default::default()
        };
        let result = ServiceTable::build(
            &SelectorFactory::default(),
            &options,
            vec![
                Instance::new("10.0.0.1", 80).with_weight(0),
                Instance::new("10.0.0.2", 80),
            ],
        );
        assert!(matches!(result, Err(CoreError::InvalidWeight { .. })));
    }
}
