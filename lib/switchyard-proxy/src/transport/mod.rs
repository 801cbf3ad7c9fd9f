//! Per-route transports: mock responses, HTTP forwarding and streaming

pub mod factory;
pub mod http;
pub mod mock;
pub mod rewrite;
pub mod stream;
pub mod target;

pub use factory::{TransportFactory, TransportOptions};
pub use http::{is_hop_by_hop_header, HttpExecutor};
pub use mock::mock_response;
pub use rewrite::{path_and_query, rewrite_path};
pub use stream::{channel_body, is_grpc, pump_bidirectional, StreamExecutor};
pub use target::{TargetResolver, Upstream};

use std::sync::Arc;

use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderName};
use hyper::{Request, Response};
use switchyard_api::{MockSpec, Rewrite, TargetType};
use switchyard_core::RouteContext;

use crate::body::{BoxError, ProxyBody};
use crate::Result;

/// Executors and header names shared by every transport of one factory
pub struct Executors {
    pub version_header: HeaderName,
    pub http: HttpExecutor,
    pub stream: StreamExecutor,
}

pub enum TransportTarget {
    Mock(MockSpec),
    Forward(TargetResolver),
}

/// What a matched route does with a request
pub struct Transport {
    name: String,
    target_type: TargetType,
    rewrite: Rewrite,
    target: TransportTarget,
    shared: Arc<Executors>,
}

impl Transport {
    pub fn new(
        name: impl Into<String>,
        target_type: TargetType,
        rewrite: Rewrite,
        target: TransportTarget,
        shared: Arc<Executors>,
    ) -> Self {
        Self {
            name: name.into(),
            target_type,
            rewrite,
            target,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_type(&self) -> TargetType {
        self.target_type
    }

    pub fn rewrite(&self) -> &Rewrite {
        &self.rewrite
    }

    pub fn target(&self) -> &TransportTarget {
        &self.target
    }

    /// Routing signal read from the request headers
    pub fn route_context(&self, headers: &HeaderMap) -> RouteContext {
        let mut ctx = RouteContext::new();
        if let Some(version) = header_str(headers, self.shared.version_header.as_str()) {
            ctx = ctx.with_version(version);
        }
        if let TransportTarget::Forward(resolver) = &self.target {
            if let Some(name) = resolver.hash_header() {
                ctx = ctx.with_hash_key(header_str(headers, name).unwrap_or_default());
            }
        }
        ctx
    }

    pub async fn handle<B>(&self, request: Request<B>) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let resolver = match &self.target {
            TransportTarget::Mock(spec) => return Ok(mock_response(spec)),
            TransportTarget::Forward(resolver) => resolver,
        };

        let ctx = self.route_context(request.headers());
        if is_grpc(request.headers()) {
            self.shared
                .stream
                .forward(resolver, &self.rewrite, ctx, request)
                .await
        } else {
            self.shared
                .http
                .forward(resolver, &self.rewrite, ctx, request)
                .await
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
