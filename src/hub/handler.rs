//! Downstream HTTP serving

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::pubsub::Hub;
use super::subscriber::Subscription;
use crate::error::{Error, Result};
use crate::multipart::{content_type, encode_part};
use crate::source::FrameSource;

/// Client address reported when neither a header nor a peer address is known
const UNKNOWN_CLIENT: &str = "unknown";

impl<S: FrameSource> Hub<S> {
    /// Serve one downstream viewer
    ///
    /// Answers 200 with a `multipart/x-mixed-replace` body carrying one part
    /// per delivered frame for as long as the client stays connected, or 503
    /// when the hub has shut down.
    pub fn handle<B>(&self, request: &http::Request<B>) -> Response {
        let client = client_address(request, self.config().client_header.as_deref());

        if self.is_closed() {
            return unavailable(self.path(), &client);
        }
        let subscription = match self.subscribe(client.clone()) {
            Ok(subscription) => subscription,
            Err(_) => return unavailable(self.path(), &client),
        };

        tracing::debug!(
            path = %self.path(),
            subscriber = subscription.id(),
            client = %client,
            "Streaming to client"
        );

        let boundary = self.config().boundary.clone();
        let Ok(content_type) = HeaderValue::from_str(&content_type(&boundary)) else {
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let parts = subscription.map(move |frame| Ok::<_, Infallible>(encode_part(&boundary, &frame)));

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(header::PRAGMA, "no-cache")
            .body(Body::from_stream(parts))
            .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
    }

    /// Router serving this hub at its path
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(self.path(), get(serve::<S>))
            .with_state(Arc::clone(self))
    }
}

async fn serve<S: FrameSource>(State(hub): State<Arc<Hub<S>>>, request: Request) -> Response {
    hub.handle(&request)
}

fn unavailable(path: &str, client: &str) -> Response {
    tracing::warn!(path = %path, client = %client, "Hub is shut down, rejecting client");
    (StatusCode::SERVICE_UNAVAILABLE, "stream unavailable").into_response()
}

/// Client address for logs: configured header, else peer address, else "unknown"
pub fn client_address<B>(request: &http::Request<B>, client_header: Option<&str>) -> String {
    let from_header = client_header
        .and_then(|name| request.headers().get(name))
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    if let Some(client) = from_header {
        return client.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Write a subscription as a multipart stream into any byte sink
///
/// Returns the number of parts written once the subscription ends. A failed
/// write ends the subscription and is reported as [`Error::ClientWrite`].
pub async fn write_stream<W>(mut subscription: Subscription, writer: &mut W, boundary: &str) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0;

    while let Some(frame) = subscription.recv().await {
        let part = encode_part(boundary, &frame);
        if let Err(e) = write_part(writer, &part).await {
            tracing::debug!(
                subscriber = subscription.id(),
                client = %subscription.client(),
                error = %e,
                "Client write failed"
            );
            return Err(Error::ClientWrite(e));
        }
        written += 1;
    }

    Ok(written)
}

async fn write_part<W: AsyncWrite + Unpin>(writer: &mut W, part: &[u8]) -> std::io::Result<()> {
    writer.write_all(part).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::DuplexStream;
    use tokio::time::timeout;

    use super::*;
    use crate::hub::{HubConfig, HubState};
    use crate::ingest::{IngestConfig, Ingester};
    use crate::media::Frame;
    use crate::multipart::MultipartDecoder;
    use crate::source::{ChannelSource, UpstreamFeeder};

    const UPSTREAM_TYPE: &str = "multipart/x-mixed-replace; boundary=up";

    fn hub(config: HubConfig) -> (Arc<Hub<ChannelSource>>, UpstreamFeeder) {
        let (source, feeder) = ChannelSource::new("cam");
        let ingester = Ingester::with_source(source, 0.0, IngestConfig::default());
        let hub = Arc::new(Hub::new("/cam", ingester, config));
        hub.start();
        (hub, feeder)
    }

    async fn send(upstream: &mut DuplexStream, payload: &'static [u8]) {
        let part = encode_part("up", &Frame::jpeg(Bytes::from_static(payload), 0));
        upstream.write_all(&part).await.unwrap();
    }

    fn request() -> http::Request<()> {
        http::Request::builder().uri("/cam").body(()).unwrap()
    }

    #[test]
    fn test_client_address_from_header() {
        let mut request = http::Request::builder()
            .header("X-Forwarded-For", "203.0.113.9")
            .body(())
            .unwrap();
        let peer: SocketAddr = "10.0.0.2:5555".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        assert_eq!(client_address(&request, Some("X-Forwarded-For")), "203.0.113.9");
        assert_eq!(client_address(&request, Some("X-Real-IP")), "10.0.0.2:5555");
        assert_eq!(client_address(&request, None), "10.0.0.2:5555");
    }

    #[test]
    fn test_client_address_unknown() {
        assert_eq!(client_address(&request(), None), "unknown");
    }

    #[tokio::test]
    async fn test_handle_streams_parts() {
        let (hub, feeder) = hub(HubConfig::default().boundary("down"));
        let mut upstream = feeder.open(UPSTREAM_TYPE);

        let response = hub.handle(&request());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=down"
        );
        assert!(response.headers()[header::CACHE_CONTROL]
            .to_str()
            .unwrap()
            .contains("no-cache"));

        send(&mut upstream, b"jpeg").await;

        let mut body = response.into_body().into_data_stream();
        let chunk = timeout(Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let mut decoder = MultipartDecoder::new(&chunk[..], "down");
        let frame = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(&frame.data[..], b"jpeg");
        assert_eq!(&*frame.content_type, "image/jpeg");
    }

    #[tokio::test]
    async fn test_dropped_body_leaves_hub() {
        let (hub, _feeder) = hub(HubConfig::default());

        let response = hub.handle(&request());
        assert_eq!(hub.stats().await.unwrap().subscriber_count(), 1);

        drop(response);
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.subscriber_count(), 0);
        assert_eq!(stats.state, HubState::Draining);
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (hub, _feeder) = hub(HubConfig::default());
        hub.shutdown().await;

        let response = hub.handle(&request());
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_write_stream_until_shutdown() {
        let (hub, feeder) = hub(HubConfig::default());
        let mut upstream = feeder.open(UPSTREAM_TYPE);
        let subscription = hub.subscribe("writer").unwrap();

        let (mut sink, client) = tokio::io::duplex(64 * 1024);
        let writer = tokio::spawn(async move {
            write_stream(subscription, &mut sink, "down").await
        });

        send(&mut upstream, b"first").await;
        send(&mut upstream, b"second").await;

        let mut decoder = MultipartDecoder::new(client, "down");
        let first = decoder.next_frame().await.unwrap().unwrap();
        let second = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(&first.data[..], b"first");
        assert_eq!(&second.data[..], b"second");

        hub.shutdown().await;
        assert_eq!(writer.await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_write_stream_reports_client_error() {
        let (hub, feeder) = hub(HubConfig::default());
        let mut upstream = feeder.open(UPSTREAM_TYPE);
        let subscription = hub.subscribe("writer").unwrap();

        let mut sink = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();

        send(&mut upstream, b"frame").await;
        let err = write_stream(subscription, &mut sink, "down").await.unwrap_err();
        assert!(matches!(err, Error::ClientWrite(ref e) if e.kind() == io::ErrorKind::BrokenPipe));

        // The failed writer no longer counts as a subscriber
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.subscriber_count(), 0);
    }
}
