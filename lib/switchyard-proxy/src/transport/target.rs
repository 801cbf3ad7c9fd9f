//! Upstream address resolution for forwarding transports

use std::fmt;
use std::sync::Arc;

use hyper::http::uri::{Authority, Scheme};
use hyper::Uri;
use switchyard_api::{ConfigError, Instance};
use switchyard_core::{DiscoveryCache, RouteContext, Selector};
use tracing::debug;

use crate::Result;

/// Scheme and authority of one upstream
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upstream {
    pub scheme: Scheme,
    pub authority: Authority,
}

impl Upstream {
    /// Accepts `host:port` or `scheme://host:port`; plain HTTP by default
    pub fn parse(target: &str) -> Result<Self> {
        if target.contains("://") {
            let uri: Uri = target.parse()?;
            let authority = uri.authority().cloned().ok_or_else(|| {
                ConfigError::InvalidRouteConfig(format!("target {:?} has no authority", target))
            })?;
            Ok(Self {
                scheme: uri.scheme().cloned().unwrap_or(Scheme::HTTP),
                authority,
            })
        } else {
            Ok(Self {
                scheme: Scheme::HTTP,
                authority: target.parse()?,
            })
        }
    }

    pub fn from_instance(instance: &Instance) -> Result<Self> {
        Ok(Self {
            scheme: Scheme::HTTP,
            authority: instance.authority().parse()?,
        })
    }

    pub fn uri(&self, path_and_query: &str) -> Result<Uri> {
        Ok(Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()?)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}

/// Where a forwarding route sends its traffic
pub enum TargetResolver {
    /// Fixed weighted list chosen when the route was registered
    Static {
        selector: Arc<dyn Selector<Upstream>>,
        hash_header: Option<String>,
    },
    /// Instances of a service, through the discovery cache
    Discovery {
        cache: Arc<DiscoveryCache>,
        service: String,
        hash_header: Option<String>,
    },
}

impl TargetResolver {
    pub async fn resolve(&self, ctx: &RouteContext) -> Result<Upstream> {
        match self {
            TargetResolver::Static { selector, .. } => {
                let node = selector.select(ctx.hash_key())?;
                Ok(node.data.clone())
            }
            TargetResolver::Discovery { cache, service, .. } => {
                let table = cache.load(service).await?;
                let instance = table.choose(ctx)?;
                debug!(service = %service, instance = %instance.authority(), "Selected instance");
                Upstream::from_instance(instance)
            }
        }
    }

    pub fn hash_header(&self) -> Option<&str> {
        match self {
            TargetResolver::Static { hash_header, .. }
            | TargetResolver::Discovery { hash_header, .. } => hash_header.as_deref(),
        }
    }

    pub fn is_discovery(&self) -> bool {
        matches!(self, TargetResolver::Discovery { .. })
    }
}
