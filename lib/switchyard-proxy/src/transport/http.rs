//! HTTP request forwarding with retries and streamed responses

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONNECTION, HOST};
use hyper::http::request::Parts;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use switchyard_api::Rewrite;
use switchyard_core::RouteContext;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

use crate::body::{BoxError, ProxyBody};
use crate::policy::TrafficPolicy;
use crate::transport::rewrite::path_and_query;
use crate::transport::TargetResolver;
use crate::{ClientAddr, ProxyError, Result};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Forwards plain HTTP requests through a pooled client.
///
/// The request body is buffered once so a retry can replay it; the response
/// body of the final attempt is streamed back as it arrives.
pub struct HttpExecutor {
    client: Client<HttpConnector, Full<Bytes>>,
    policy: TrafficPolicy,
}

impl HttpExecutor {
    pub fn new(policy: TrafficPolicy) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(policy.timeout.connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(30)));

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(connector);

        Self { client, policy }
    }

    pub fn policy(&self) -> &TrafficPolicy {
        &self.policy
    }

    pub async fn forward<B>(
        &self,
        resolver: &TargetResolver,
        rewrite: &Rewrite,
        ctx: RouteContext,
        request: Request<B>,
    ) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| {
                let e: BoxError = e.into();
                ProxyError::Body(e.to_string())
            })?
            .to_bytes();

        let target = path_and_query(rewrite, parts.uri.path(), parts.uri.query());
        let headers = forwarded_headers(&parts);
        let retry = &self.policy.retry;

        let mut attempt = 0;
        loop {
            // discovery retries go to the default partition
            let attempt_ctx = if attempt > 0 && resolver.is_discovery() {
                ctx.pinned_to_default()
            } else {
                ctx.clone()
            };
            let upstream = resolver.resolve(&attempt_ctx).await?;
            let uri = upstream.uri(&target)?;
            debug!(upstream = %upstream, attempt, "Forwarding request");

            let mut outbound = Request::builder()
                .method(parts.method.clone())
                .uri(uri)
                .version(Version::HTTP_11)
                .body(Full::new(body.clone()))?;
            *outbound.headers_mut() = headers.clone();

            let retries_left = attempt < retry.max_retries;
            match tokio_timeout(
                self.policy.timeout.request_timeout,
                self.client.request(outbound),
            )
            .await
            {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if retries_left && retry.should_retry(status.as_u16()) {
                        debug!(upstream = %upstream, status = %status, "Retryable upstream status");
                        tokio::time::sleep(retry.backoff_duration(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Ok(stream_response(response));
                }
                Ok(Err(e)) => {
                    warn!(upstream = %upstream, error = %e, "Backend request error");
                    if retries_left {
                        tokio::time::sleep(retry.backoff_duration(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ProxyError::Upstream {
                        status: StatusCode::BAD_GATEWAY,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    warn!(
                        upstream = %upstream,
                        "Backend request timeout after {}s",
                        self.policy.timeout.request_timeout.as_secs()
                    );
                    return Err(ProxyError::Timeout);
                }
            }
        }
    }
}

fn stream_response(response: Response<hyper::body::Incoming>) -> Response<ProxyBody> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers, false);
    Response::from_parts(parts, body.map_err(BoxError::from).boxed_unsync())
}

/// Outbound headers: inbound minus hop-by-hop and host, plus forwarding headers
fn forwarded_headers(parts: &Parts) -> HeaderMap {
    let mut headers = parts.headers.clone();
    strip_hop_by_hop(&mut headers, false);

    if let Some(host) = headers.remove(HOST) {
        headers.insert(X_FORWARDED_HOST.clone(), host);
    }
    if let Some(ClientAddr(addr)) = parts.extensions.get::<ClientAddr>() {
        let forwarded = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{}, {}", existing, addr.ip()),
            None => addr.ip().to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }
    headers
}

/// Remove hop-by-hop headers, including any named by `connection`.
///
/// `keep_te` keeps `te: trailers`, which gRPC needs end to end.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap, keep_te: bool) {
    let listed: Vec<String> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();
    for name in listed {
        headers.remove(name.as_str());
    }

    for name in HOP_BY_HOP {
        if keep_te && *name == "te" {
            continue;
        }
        headers.remove(*name);
    }
}

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Check if header is hop-by-hop (should not be forwarded)
pub fn is_hop_by_hop_header(name: &str) -> bool {
    HOP_BY_HOP.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_hop_by_hop_headers() {
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("keep-alive"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("authorization"));
    }

    #[test]
    fn test_connection_listed_headers_removed() {
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, "keep-alive, x-session-hint".parse().unwrap());
        headers.insert("x-session-hint", "1".parse().unwrap());
        headers.insert("te", "trailers".parse().unwrap());
        headers.insert("content-type", "application/json".parse().unwrap());

        let mut grpc = headers.clone();
        strip_hop_by_hop(&mut headers, false);
        assert!(headers.get("x-session-hint").is_none());
        assert!(headers.get("te").is_none());
        assert!(headers.get("content-type").is_some());

        strip_hop_by_hop(&mut grpc, true);
        assert_eq!(grpc["te"], "trailers");
    }

    #[test]
    fn test_forwarding_headers() {
        let mut request = Request::builder()
            .uri("/host")
            .header("host", "gateway.example.com")
            .header("x-forwarded-for", "10.1.1.1")
            .header("upgrade", "websocket")
            .body(())
            .unwrap();
        let addr: SocketAddr = "192.168.0.9:51000".parse().unwrap();
        request.extensions_mut().insert(ClientAddr(addr));

        let (parts, _) = request.into_parts();
        let headers = forwarded_headers(&parts);
        assert!(headers.get(HOST).is_none());
        assert!(headers.get("upgrade").is_none());
        assert_eq!(headers["x-forwarded-host"], "gateway.example.com");
        assert_eq!(headers["x-forwarded-for"], "10.1.1.1, 192.168.0.9");
    }

    #[test]
    fn test_executor_keeps_policy() {
        let executor = HttpExecutor::new(TrafficPolicy::default());
        assert_eq!(executor.policy().retry.max_retries, 1);
        assert_eq!(
            executor.policy().timeout.request_timeout,
            Duration::from_secs(30)
        );
    }
}
