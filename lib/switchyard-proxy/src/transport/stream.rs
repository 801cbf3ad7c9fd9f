//! Bidirectional frame pumping for streaming RPC (gRPC) routes
//!
//! Frames are forwarded as opaque payloads: data frames and trailers pass
//! through without decoding any message schema.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::{mpsc, oneshot};
use futures::future::try_join;
use futures::{SinkExt, Stream, StreamExt};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Body, Bytes, Frame, Incoming};
use hyper::header::{HeaderMap, CONTENT_TYPE, HOST};
use hyper::http::response;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use switchyard_api::Rewrite;
use switchyard_core::RouteContext;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::body::{BoxError, ProxyBody};
use crate::transport::http::strip_hop_by_hop;
use crate::transport::rewrite::path_and_query;
use crate::transport::TargetResolver;
use crate::{ProxyError, Result};

const FRAME_BUFFER: usize = 16;

/// Whether a request should take the streaming path
pub fn is_grpc(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |ct| ct.starts_with("application/grpc"))
}

/// One direction's producer of frames; `None` is end of stream
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Option<Result<Frame<Bytes>>>;
}

/// One direction's consumer of frames
#[async_trait]
pub trait FrameSink: Send {
    async fn send_frame(&mut self, frame: Frame<Bytes>) -> Result<()>;

    /// Signal a clean end of stream
    async fn close(&mut self);

    /// Tear the stream down after a failure in either direction
    fn abort(&mut self, error: &ProxyError);

    /// Resolves once whoever consumes this sink has gone away
    async fn closed(&mut self) {
        futures::future::pending::<()>().await
    }
}

/// Copy frames until the source ends, then close the sink.
///
/// Fails as soon as the sink's consumer goes away, even while the source is
/// idle.
pub async fn copy_frames<S, K>(source: &mut S, sink: &mut K) -> Result<u64>
where
    S: FrameSource + ?Sized,
    K: FrameSink + ?Sized,
{
    let mut frames = 0;
    loop {
        let next = tokio::select! {
            next = source.next_frame() => next,
            _ = sink.closed() => {
                return Err(ProxyError::Stream("peer closed the stream".to_string()));
            }
        };
        let Some(frame) = next else { break };
        sink.send_frame(frame?).await?;
        frames += 1;
    }
    sink.close().await;
    Ok(frames)
}

/// Run both copy loops concurrently until both finish.
///
/// The first error from either direction stops the other loop, aborts both
/// sinks and is returned. On success returns the frame counts
/// `(client to upstream, upstream to client)`.
pub async fn pump_bidirectional<A, B, C, D>(
    client_source: &mut A,
    upstream_sink: &mut B,
    upstream_source: &mut C,
    client_sink: &mut D,
) -> Result<(u64, u64)>
where
    A: FrameSource + ?Sized,
    B: FrameSink + ?Sized,
    C: FrameSource + ?Sized,
    D: FrameSink + ?Sized,
{
    let result = try_join(
        copy_frames(client_source, upstream_sink),
        copy_frames(upstream_source, client_sink),
    )
    .await;

    if let Err(e) = &result {
        upstream_sink.abort(e);
        client_sink.abort(e);
    }
    result
}

/// Frames of a hyper body
pub struct BodySource<B> {
    body: Pin<Box<B>>,
}

impl<B> BodySource<B> {
    pub fn new(body: B) -> Self {
        Self {
            body: Box::pin(body),
        }
    }
}

#[async_trait]
impl<B> FrameSource for BodySource<B>
where
    B: Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    async fn next_frame(&mut self) -> Option<Result<Frame<Bytes>>> {
        self.body.frame().await.map(|frame| {
            frame.map_err(|e| {
                let e: BoxError = e.into();
                ProxyError::Stream(e.to_string())
            })
        })
    }
}

type FrameItem = std::result::Result<Frame<Bytes>, BoxError>;

/// Feeds a channel-backed body handed to hyper
pub struct ChannelSink {
    tx: Option<mpsc::Sender<FrameItem>>,
    // canceled when the body is dropped
    alive: oneshot::Sender<()>,
}

/// Receiving half of [`channel_body`]; dropping it cancels `alive`
struct ChannelReceiver {
    rx: mpsc::Receiver<FrameItem>,
    _alive: oneshot::Receiver<()>,
}

impl Stream for ChannelReceiver {
    type Item = FrameItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<FrameItem>> {
        self.rx.poll_next_unpin(cx)
    }
}

/// A body plus the sink that feeds it
pub fn channel_body() -> (ChannelSink, ProxyBody) {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let (alive, alive_rx) = oneshot::channel();
    let sink = ChannelSink {
        tx: Some(tx),
        alive,
    };
    let receiver = ChannelReceiver {
        rx,
        _alive: alive_rx,
    };
    (sink, StreamBody::new(receiver).boxed_unsync())
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_frame(&mut self, frame: Frame<Bytes>) -> Result<()> {
        match self.tx.as_mut() {
            Some(tx) => tx
                .send(Ok(frame))
                .await
                .map_err(|_| ProxyError::Stream("peer closed the stream".to_string())),
            None => Err(ProxyError::Stream("stream already closed".to_string())),
        }
    }

    async fn close(&mut self) {
        self.tx.take();
    }

    fn abort(&mut self, error: &ProxyError) {
        if let Some(mut tx) = self.tx.take() {
            let _ = tx.try_send(Err(error.to_string().into()));
        }
    }

    async fn closed(&mut self) {
        self.alive.cancellation().await
    }
}

type PendingResponse = JoinHandle<std::result::Result<Response<Incoming>, hyper_util::client::legacy::Error>>;

/// Upstream response body that first waits for the response head.
///
/// The head is handed to the caller through a oneshot so the gateway can
/// answer the client while frames keep flowing.
struct ResponseSource {
    pending: Option<(PendingResponse, oneshot::Sender<Result<response::Parts>>)>,
    body: Option<Pin<Box<Incoming>>>,
}

impl ResponseSource {
    fn new(response: PendingResponse, head: oneshot::Sender<Result<response::Parts>>) -> Self {
        Self {
            pending: Some((response, head)),
            body: None,
        }
    }
}

#[async_trait]
impl FrameSource for ResponseSource {
    async fn next_frame(&mut self) -> Option<Result<Frame<Bytes>>> {
        if let Some((handle, _)) = self.pending.as_mut() {
            // stays in `pending` while awaited so drop can abort it
            let joined = handle.await;
            let (_, head) = self.pending.take()?;
            let response = match joined {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(ProxyError::Upstream {
                    status: StatusCode::BAD_GATEWAY,
                    message: e.to_string(),
                }),
                Err(e) => Err(ProxyError::Stream(e.to_string())),
            };
            match response {
                Ok(response) => {
                    let (parts, body) = response.into_parts();
                    if head.send(Ok(parts)).is_err() {
                        return Some(Err(ProxyError::Stream("caller went away".to_string())));
                    }
                    self.body = Some(Box::pin(body));
                }
                Err(e) => {
                    let message = e.to_string();
                    let _ = head.send(Err(e));
                    return Some(Err(ProxyError::Stream(message)));
                }
            }
        }

        let body = self.body.as_mut()?;
        body.frame()
            .await
            .map(|frame| frame.map_err(|e| ProxyError::Stream(e.to_string())))
    }
}

impl Drop for ResponseSource {
    fn drop(&mut self) {
        if let Some((handle, _)) = &self.pending {
            handle.abort();
        }
    }
}

/// Forwards streaming RPCs over HTTP/2 with prior knowledge
pub struct StreamExecutor {
    client: Client<HttpConnector, ProxyBody>,
    header_timeout: Duration,
}

impl StreamExecutor {
    pub fn new(connect_timeout: Duration, header_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build::<_, ProxyBody>(connector);

        Self {
            client,
            header_timeout,
        }
    }

    /// Open the upstream stream and return the client response once the
    /// upstream head arrives. Frames keep flowing in a background task until
    /// both directions finish or one fails. Dropping the returned body ends
    /// that task and resets the upstream stream.
    pub async fn forward<B>(
        &self,
        resolver: &TargetResolver,
        rewrite: &Rewrite,
        ctx: RouteContext,
        request: Request<B>,
    ) -> Result<Response<ProxyBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let upstream = resolver.resolve(&ctx).await?;
        let (mut parts, body) = request.into_parts();

        parts.uri = upstream.uri(&path_and_query(rewrite, parts.uri.path(), parts.uri.query()))?;
        parts.version = Version::HTTP_2;
        parts.headers.remove(HOST);
        strip_hop_by_hop(&mut parts.headers, true);

        let (mut upstream_sink, upstream_body) = channel_body();
        let outbound = Request::from_parts(parts, upstream_body);

        // spawned before waiting for headers so request frames can flow
        let response = tokio::spawn(self.client.request(outbound));

        let (head_tx, head_rx) = oneshot::channel();
        let (mut client_sink, client_body) = channel_body();
        let label = upstream.to_string();
        let pump = tokio::spawn(async move {
            let mut client_source = BodySource::new(body);
            let mut upstream_source = ResponseSource::new(response, head_tx);
            match pump_bidirectional(
                &mut client_source,
                &mut upstream_sink,
                &mut upstream_source,
                &mut client_sink,
            )
            .await
            {
                Ok((sent, received)) => {
                    debug!(upstream = %label, sent, received, "Stream finished");
                }
                Err(e) => warn!(upstream = %label, error = %e, "Stream aborted"),
            }
        });

        let head = match tokio::time::timeout(self.header_timeout, head_rx).await {
            Err(_) => Err(ProxyError::Timeout),
            Ok(Err(_)) => Err(ProxyError::Stream(
                "stream closed before response headers".to_string(),
            )),
            Ok(Ok(head)) => head,
        };
        let mut head = match head {
            Ok(head) => head,
            Err(e) => {
                // drops the pending upstream request along with the task
                pump.abort();
                return Err(e);
            }
        };
        strip_hop_by_hop(&mut head.headers, true);
        Ok(Response::from_parts(head, client_body))
    }
}
