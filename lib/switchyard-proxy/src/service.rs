//! Tower service that routes matched requests and passes the rest through

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use hyper::body::{Body, Bytes};
use hyper::{Request, Response};
use tower::{Layer, Service};
use tracing::warn;

use crate::body::{error_response, BoxError, ProxyBody};
use crate::matching::RequestView;
use crate::middleware::{MiddlewareChain, MiddlewareContext};
use crate::router::GatewayRouter;
use crate::transport::Transport;

/// Body returned when a matched route cannot be served
pub const DEFAULT_ERROR_BODY: &str = "upstream unavailable";

#[derive(Clone)]
pub struct GatewayLayer {
    router: Arc<GatewayRouter>,
    chain: Arc<MiddlewareChain>,
    error_body: Arc<str>,
}

impl GatewayLayer {
    pub fn new(router: Arc<GatewayRouter>) -> Self {
        Self {
            router,
            chain: Arc::new(MiddlewareChain::new()),
            error_body: Arc::from(DEFAULT_ERROR_BODY),
        }
    }

    pub fn with_middleware(mut self, chain: MiddlewareChain) -> Self {
        self.chain = Arc::new(chain);
        self
    }

    pub fn with_error_body(mut self, body: impl Into<Arc<str>>) -> Self {
        self.error_body = body.into();
        self
    }
}

impl<S> Layer<S> for GatewayLayer {
    type Service = GatewayService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GatewayService {
            router: self.router.clone(),
            chain: self.chain.clone(),
            error_body: self.error_body.clone(),
            inner,
        }
    }
}

/// Routes requests that match a gateway route; anything else goes to
/// the inner service untouched.
#[derive(Clone)]
pub struct GatewayService<S> {
    router: Arc<GatewayRouter>,
    chain: Arc<MiddlewareChain>,
    error_body: Arc<str>,
    inner: S,
}

impl<S, B> Service<Request<B>> for GatewayService<S>
where
    S: Service<Request<B>, Response = Response<ProxyBody>> + Send + 'static,
    S::Future: Send + 'static,
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    type Response = Response<ProxyBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let transport = self
            .router
            .find_transport(&RequestView::from_request(&request));

        match transport {
            Some(transport) => {
                let chain = self.chain.clone();
                let error_body = self.error_body.clone();
                Box::pin(async move { Ok(serve(transport, chain, error_body, request).await) })
            }
            None => Box::pin(self.inner.call(request)),
        }
    }
}

async fn serve<B>(
    transport: Arc<Transport>,
    chain: Arc<MiddlewareChain>,
    error_body: Arc<str>,
    request: Request<B>,
) -> Response<ProxyBody>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let context = MiddlewareContext::for_route(&request, transport.name(), transport.target_type());
    if let Err(e) = chain.on_request(&context).await {
        warn!(route = %context.route, error = %e, "Middleware error on request");
    }

    match transport.handle(request).await {
        Ok(response) => {
            if let Err(e) = chain.on_response(&context, response.status().as_u16()).await {
                warn!(route = %context.route, error = %e, "Middleware error on response");
            }
            response
        }
        Err(e) => {
            let status = e.status_code();
            warn!(route = %context.route, status = %status, error = %e, "Route failed");
            if let Err(e) = chain.on_error(&context, status.as_u16(), &e.to_string()).await {
                warn!(route = %context.route, error = %e, "Middleware error on failure");
            }
            error_response(status, &error_body)
        }
    }
}

/// Terminal service for requests no route claims
#[derive(Clone, Copy, Debug, Default)]
pub struct NotFound;

impl<B> Service<Request<B>> for NotFound {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = std::future::Ready<Result<Self::Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Infallible>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _request: Request<B>) -> Self::Future {
        std::future::ready(Ok(error_response(hyper::StatusCode::NOT_FOUND, "no route")))
    }
}
