//! Gateway routing and proxying
//!
//! - matching: exact, prefix trie and expression route lookup
//! - transport: mock responses, HTTP forwarding with retries, gRPC streaming
//! - router: builds the route table from configuration
//! - service: tower layer that serves matched requests
//! - middleware / metrics: per-route hooks and Prometheus counters

use std::net::SocketAddr;

pub mod body;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod middleware;
pub mod policy;
pub mod router;
pub mod service;
pub mod transport;

pub use body::{BoxError, ProxyBody};
pub use error::{ProxyError, Result};
pub use matching::{MatchPolicy, MatcherRegistry, RequestView};
pub use metrics::{MetricsCollector, MetricsMiddleware};
pub use middleware::{LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareContext};
pub use policy::{RetryPolicy, TimeoutPolicy, TrafficPolicy};
pub use router::{GatewayRouter, GatewayRouterBuilder};
pub use service::{GatewayLayer, GatewayService, NotFound};
pub use transport::{Transport, TransportFactory, TransportOptions};

/// Peer address of the downstream connection, stored in request extensions
/// by the server so forwarded requests can carry `x-forwarded-for`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);
