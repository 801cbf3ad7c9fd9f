//! Hooks run around every routed request

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use hyper::Request;
use parking_lot::Mutex;
use switchyard_api::TargetType;
use tracing::{debug, span, Instrument, Level};

/// Context passed through middleware chain
#[derive(Clone)]
pub struct MiddlewareContext {
    pub path: String,
    pub method: String,
    /// Name of the matched route
    pub route: String,
    pub target_type: TargetType,
    /// When the gateway started handling the request
    pub started: Instant,
    /// Custom metadata for middleware
    pub metadata: Arc<Mutex<HashMap<String, String>>>,
}

impl MiddlewareContext {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        route: impl Into<String>,
        target_type: TargetType,
    ) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            route: route.into(),
            target_type,
            started: Instant::now(),
            metadata: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Context for a request matched to `route`
    pub fn for_route<B>(request: &Request<B>, route: &str, target_type: TargetType) -> Self {
        Self::new(
            request.method().as_str(),
            request.uri().path(),
            route,
            target_type,
        )
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn get_metadata(&self, key: &str) -> Option<String> {
        self.metadata.lock().get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.lock().insert(key.into(), value.into());
    }
}

/// Middleware trait for processing requests and responses
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &'static str {
        "UnnamedMiddleware"
    }

    /// Called before the transport runs
    async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
        Ok(())
    }

    /// Called once the response head is ready
    async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
        Ok(())
    }

    /// Called when the transport fails; `status` is what the client gets
    async fn on_error(&self, _context: &MiddlewareContext, _status: u16, _error: &str) -> Result<()> {
        Ok(())
    }
}

/// Chain of middleware to execute in order
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middleware: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    pub async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        for mw in &self.middleware {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_request(context).instrument(span).await?;
        }
        Ok(())
    }

    /// Process response through all middleware (in reverse order)
    pub async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_response(context, status).instrument(span).await?;
        }
        Ok(())
    }

    pub async fn on_error(&self, context: &MiddlewareContext, status: u16, error: &str) -> Result<()> {
        for mw in self.middleware.iter().rev() {
            let span = span!(Level::DEBUG, "middleware", name = mw.name());
            mw.on_error(context, status, error).instrument(span).await?;
        }
        Ok(())
    }
}

/// Logs each routed request with its latency
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }

    async fn on_request(&self, context: &MiddlewareContext) -> Result<()> {
        debug!(
            method = %context.method,
            path = %context.path,
            route = %context.route,
            target_type = %context.target_type,
            "Routing request"
        );
        Ok(())
    }

    async fn on_response(&self, context: &MiddlewareContext, status: u16) -> Result<()> {
        debug!(
            method = %context.method,
            path = %context.path,
            route = %context.route,
            status,
            elapsed_ms = context.elapsed().as_millis() as u64,
            "Routed request"
        );
        Ok(())
    }

    async fn on_error(&self, context: &MiddlewareContext, status: u16, error: &str) -> Result<()> {
        debug!(
            method = %context.method,
            path = %context.path,
            route = %context.route,
            status,
            error,
            "Route failed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context() -> MiddlewareContext {
        MiddlewareContext::new("GET", "/test", "/test", TargetType::Domain)
    }

    struct Recorder {
        order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    }

    #[async_trait::async_trait]
    impl Middleware for Recorder {
        async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
            self.order.lock().push(self.label);
            Ok(())
        }

        async fn on_response(&self, _context: &MiddlewareContext, _status: u16) -> Result<()> {
            self.order.lock().push(self.label);
            Ok(())
        }
    }

    struct Rejecting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl Middleware for Rejecting {
        async fn on_request(&self, _context: &MiddlewareContext) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("rejected")
        }
    }

    #[test]
    fn test_middleware_context_metadata() {
        let context = context();
        context.set_metadata("key1", "value1");
        assert_eq!(context.get_metadata("key1"), Some("value1".to_string()));
        assert_eq!(context.get_metadata("key2"), None);

        // clones share metadata
        let clone = context.clone();
        clone.set_metadata("key2", "value2");
        assert_eq!(context.get_metadata("key2"), Some("value2".to_string()));
    }

    #[test]
    fn test_context_for_route() {
        let request = Request::builder()
            .method("POST")
            .uri("/users/7?x=1")
            .body(())
            .unwrap();
        let context = MiddlewareContext::for_route(&request, "/users", TargetType::Discovery);
        assert_eq!(context.method, "POST");
        assert_eq!(context.path, "/users/7");
        assert_eq!(context.route, "/users");
        assert_eq!(context.target_type, TargetType::Discovery);
    }

    #[tokio::test]
    async fn test_chain_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let chain = MiddlewareChain::new()
            .add(Recorder {
                order: order.clone(),
                label: "outer",
            })
            .add(Recorder {
                order: order.clone(),
                label: "inner",
            });
        assert_eq!(chain.len(), 2);

        let context = context();
        chain.on_request(&context).await.unwrap();
        chain.on_response(&context, 200).await.unwrap();
        assert_eq!(*order.lock(), vec!["outer", "inner", "inner", "outer"]);
    }

    #[tokio::test]
    async fn test_chain_stops_at_first_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = MiddlewareChain::new()
            .add(Rejecting(calls.clone()))
            .add(Rejecting(calls.clone()));
        assert!(chain.on_request(&context()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_logging_middleware() {
        let chain = MiddlewareChain::new().add(LoggingMiddleware);
        let context = context();
        assert!(chain.on_request(&context).await.is_ok());
        assert!(chain.on_response(&context, 200).await.is_ok());
        assert!(chain.on_error(&context, 502, "boom").await.is_ok());
    }
}
