use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use switchyard_core::{StaticRegistry, Watcher, WatcherConfig};
use switchyard_proxy::body::{error_response, response};
use switchyard_proxy::{
    ClientAddr, GatewayLayer, GatewayRouter, LoggingMiddleware, MatcherRegistry, MetricsCollector,
    MetricsMiddleware, MiddlewareChain, ProxyBody, TransportFactory,
};
use tokio::net::TcpListener;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

use config::GatewayConfig;

/// Switchyard API gateway
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (.yaml, .yml or .json)
    #[arg(short, long, env = "SWITCHYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Print the JSON schema of a route entry and exit
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_schema {
        println!("{}", serde_json::to_string_pretty(&switchyard_api::route_schema())?);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchyard=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting switchyard-gateway...");

    let config = match &args.config {
        Some(path) => {
            let config = GatewayConfig::from_file(path)?;
            info!("Configuration loaded from {}", path.display());
            config
        }
        None => {
            warn!("No configuration file given, starting with defaults and no routes");
            GatewayConfig::default()
        }
    };

    let registry = Arc::new(StaticRegistry::new());
    for (service, instances) in &config.registry {
        registry
            .register_service(service.clone(), instances.clone())
            .await;
    }
    info!(services = ?registry.list().await, "Service registry initialized");

    let metrics = MetricsCollector::new()?;

    let factory = Arc::new(
        TransportFactory::new(registry.clone(), config.transport_options()?)
            .with_refresh_observer(metrics.refresh_observer()),
    );
    let mut builder = GatewayRouter::builder(
        factory.clone(),
        Arc::new(MatcherRegistry::new()),
        config.prefix_match_policy,
    );
    let accepted = builder.register_all(&config.routes);
    let router = Arc::new(builder.build());
    info!(
        accepted,
        rejected = config.routes.len() - accepted,
        "Routes loaded"
    );

    let watcher = Arc::new(Watcher::new(
        registry.clone(),
        WatcherConfig {
            interval: config.watch_interval(),
        },
    ));
    let followed = factory.follow_discovery(&watcher).await;
    let _watcher_task = watcher.clone().spawn();
    info!(followed, interval = ?config.watch_interval(), "Discovery watcher started");

    let middleware = MiddlewareChain::new()
        .add(LoggingMiddleware)
        .add(MetricsMiddleware::new(metrics.clone()));

    let admin = tower::service_fn(move |req: Request<Incoming>| {
        let metrics = metrics.clone();
        async move { Ok::<_, Infallible>(admin_response(&metrics, req.uri().path())) }
    });

    let service = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(
            GatewayLayer::new(router)
                .with_middleware(middleware)
                .with_error_body(config.error_body.clone()),
        )
        .service(admin);

    let listener = TcpListener::bind(config.listen).await?;
    info!("Gateway listening on {}", config.listen);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        };

        let service = service.clone().map_request(move |mut req: Request<Incoming>| {
            req.extensions_mut().insert(ClientAddr(peer_addr));
            req
        });

        // Boxed outside the task so the Send bound is checked on the concrete
        // connection type, working around a higher-ranked lifetime inference error
        let connection: Pin<Box<dyn Future<Output = _> + Send>> = Box::pin(
            auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), TowerToHyperService::new(service))
                .into_owned(),
        );
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Error serving connection from {}: {}", peer_addr, e);
            }
        });
    }
}

/// Health and metrics endpoints for requests no route claims
fn admin_response(metrics: &MetricsCollector, path: &str) -> Response<ProxyBody> {
    match path {
        "/healthz" => response(StatusCode::OK, "text/plain; charset=utf-8", "OK\n"),
        "/metrics" => match metrics.gather() {
            Ok(text) => response(StatusCode::OK, "text/plain; version=0.0.4", text),
            Err(e) => {
                warn!(error = %e, "Failed to gather metrics");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to gather metrics")
            }
        },
        _ => error_response(StatusCode::NOT_FOUND, "no route"),
    }
}
