//! Locality-preferring routing: zone, then region, then everywhere

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::router::{RouteContext, VersionRouter};
use crate::selector::{SelectorFactory, SelectorKind};
use crate::{Node, Result};

/// Region/zone pair of an instance or of the local process
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locality {
    pub region: String,
    pub zone: String,
}

impl Locality {
    pub fn new(region: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
        }
    }
}

/// A [`VersionRouter`] per zone and per region plus a global one.
///
/// As long as any node exists somewhere, [`NearbyRouter::choose`] never
/// reports empty nodes.
pub struct NearbyRouter<T> {
    global: VersionRouter<T>,
    regions: HashMap<String, VersionRouter<T>>,
    zones: HashMap<Locality, VersionRouter<T>>,
    local: Locality,
}

impl<T: Clone + Send + Sync + 'static> NearbyRouter<T> {
    pub fn build(
        factory: &SelectorFactory,
        kind: SelectorKind,
        local_version: &str,
        local: Locality,
        nodes: Vec<(String, Locality, Node<T>)>,
    ) -> Result<Self> {
        let mut by_region: HashMap<String, Vec<(String, Node<T>)>> = HashMap::new();
        let mut by_zone: HashMap<Locality, Vec<(String, Node<T>)>> = HashMap::new();
        let mut all = Vec::with_capacity(nodes.len());

        for (version, locality, node) in nodes {
            if !locality.region.is_empty() {
                by_region
                    .entry(locality.region.clone())
                    .or_default()
                    .push((version.clone(), node.clone()));
                if !locality.zone.is_empty() {
                    by_zone
                        .entry(locality)
                        .or_default()
                        .push((version.clone(), node.clone()));
                }
            }
            all.push((version, node));
        }

        let mut regions = HashMap::with_capacity(by_region.len());
        for (region, nodes) in by_region {
            regions.insert(region, VersionRouter::build(factory, kind, local_version, nodes)?);
        }
        let mut zones = HashMap::with_capacity(by_zone.len());
        for (locality, nodes) in by_zone {
            zones.insert(locality, VersionRouter::build(factory, kind, local_version, nodes)?);
        }

        Ok(Self {
            global: VersionRouter::build(factory, kind, local_version, all)?,
            regions,
            zones,
            local,
        })
    }
}

impl<T> NearbyRouter<T> {
    /// Choose relative to the local process's locality
    pub fn choose(&self, ctx: &RouteContext) -> Result<&Node<T>> {
        self.choose_from(&self.local, ctx)
    }

    /// Choose relative to an arbitrary origin locality
    pub fn choose_from(&self, origin: &Locality, ctx: &RouteContext) -> Result<&Node<T>> {
        if let Some(router) = self.zones.get(origin) {
            match router.choose(ctx) {
                Ok(node) => return Ok(node),
                Err(e) => debug!(zone = %origin.zone, error = %e, "Zone table empty, widening to region"),
            }
        }
        if let Some(router) = self.regions.get(&origin.region) {
            match router.choose(ctx) {
                Ok(node) => return Ok(node),
                Err(e) => debug!(region = %origin.region, error = %e, "Region table empty, widening to global"),
            }
        }
        self.global.choose(ctx)
    }

    pub fn local(&self) -> &Locality {
        &self.local
    }

    pub fn global(&self) -> &VersionRouter<T> {
        &self.global
    }
}
