//! Maps incoming requests to route transports

use std::sync::Arc;

use switchyard_api::{MatchType, RouteConfig};
use tracing::{debug, info, warn};

use crate::matching::{MatchPolicy, MatcherRegistry, RequestView, RouteTable, RouteTableBuilder};
use crate::transport::{Transport, TransportFactory};
use crate::Result;

/// Immutable route table of the gateway.
///
/// Lookup order is exact path, then prefix, then expressions by priority.
/// Rebuild through [`GatewayRouter::builder`] to change routes.
pub struct GatewayRouter {
    table: RouteTable<Transport>,
}

impl GatewayRouter {
    pub fn builder(
        factory: Arc<TransportFactory>,
        matchers: Arc<MatcherRegistry>,
        policy: MatchPolicy,
    ) -> GatewayRouterBuilder {
        GatewayRouterBuilder {
            factory,
            table: RouteTable::builder(matchers, policy),
            registered: 0,
        }
    }

    pub fn find_transport(&self, request: &RequestView<'_>) -> Option<Arc<Transport>> {
        let found = self.table.find(request).cloned();
        if found.is_none() {
            debug!(path = %request.path(), host = %request.host(), "No route matched");
        }
        found
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

pub struct GatewayRouterBuilder {
    factory: Arc<TransportFactory>,
    table: RouteTableBuilder<Transport>,
    registered: usize,
}

impl GatewayRouterBuilder {
    /// Validate and add one route.
    ///
    /// Nothing is added when the route is rejected.
    pub fn register(&mut self, config: &RouteConfig) -> Result<()> {
        let spec = config.validate()?;
        let name = config.name();

        let node = match (&spec.match_type, &spec.expr) {
            (MatchType::ExprMatch, Some(expr)) => Some(self.table.matchers().compile(expr)?),
            _ => None,
        };
        let transport = self.factory.build(name.clone(), &spec)?;
        let target_type = transport.target_type();

        match spec.match_type {
            MatchType::FullMatch => self.table.insert_exact(&spec.path, transport)?,
            MatchType::PrefixMatch => self.table.insert_prefix(&spec.path, transport)?,
            MatchType::ExprMatch => {
                if let Some(node) = node {
                    self.table.insert_expr(node, spec.priority, transport);
                }
            }
        }

        self.registered += 1;
        info!(
            route = %name,
            match_type = ?spec.match_type,
            target_type = %target_type,
            "Registered route"
        );
        Ok(())
    }

    /// Register every route, logging and skipping the ones that fail.
    ///
    /// Returns the number of routes accepted.
    pub fn register_all<'a>(&mut self, configs: impl IntoIterator<Item = &'a RouteConfig>) -> usize {
        let mut accepted = 0;
        for config in configs {
            match self.register(config) {
                Ok(()) => accepted += 1,
                Err(e) => warn!(route = %config.name(), error = %e, "Rejected route"),
            }
        }
        accepted
    }

    pub fn registered(&self) -> usize {
        self.registered
    }

    pub fn build(self) -> GatewayRouter {
        GatewayRouter {
            table: self.table.build(),
        }
    }
}
