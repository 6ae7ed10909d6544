//! HTTP entry point for the transport.
//!
//! Whatever subscribes to the broker posts each message to
//! `POST /publish/<topic>` with the raw payload as the body. Messages are
//! queued for the ingest worker without blocking; a full queue is reported
//! back as 503 so the publisher can retry or drop.

use crate::metrics_defs::BRIDGE_REQUESTS;
use crate::worker::InboundMessage;
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Limited};
use hyper::body::{Body, Bytes, Incoming};
use hyper::service::Service;
use percent_encoding::percent_decode_str;
use shared::counter;
use shared::http::{ResponseBody, make_error_response, make_response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const PUBLISH_PREFIX: &str = "/publish/";

/// Mesh packets are at most a few hundred bytes; anything much larger is not
/// a service envelope.
pub const MAX_BODY_SIZE: usize = 64 * 1024;

#[derive(Clone)]
pub struct BridgeService {
    tx: mpsc::Sender<InboundMessage>,
}

impl BridgeService {
    pub fn new(tx: mpsc::Sender<InboundMessage>) -> Self {
        BridgeService { tx }
    }

    pub async fn accept<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let response = self.publish(req).await;
        counter!(BRIDGE_REQUESTS, "status" => response.status().as_str().to_string())
            .increment(1);
        response
    }

    async fn publish<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.method() != Method::POST {
            return make_error_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        let encoded = match req.uri().path().strip_prefix(PUBLISH_PREFIX) {
            Some(topic) if !topic.is_empty() => topic,
            Some(_) => return make_error_response(StatusCode::BAD_REQUEST),
            None => return make_error_response(StatusCode::NOT_FOUND),
        };
        let topic = match percent_decode_str(encoded).decode_utf8() {
            Ok(topic) => topic.into_owned(),
            Err(e) => {
                tracing::debug!(topic = encoded, "topic is not valid utf-8: {e}");
                return make_error_response(StatusCode::BAD_REQUEST);
            }
        };

        let payload = match Limited::new(req.into_body(), MAX_BODY_SIZE).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::debug!(%topic, "could not read publish body: {e}");
                return make_error_response(StatusCode::PAYLOAD_TOO_LARGE);
            }
        };

        match self.tx.try_send(InboundMessage { topic, payload }) {
            Ok(()) => make_response(StatusCode::ACCEPTED, ""),
            Err(TrySendError::Full(message)) => {
                tracing::warn!(topic = %message.topic, "ingest queue full, rejecting message");
                make_error_response(StatusCode::SERVICE_UNAVAILABLE)
            }
            Err(TrySendError::Closed(_)) => make_error_response(StatusCode::SERVICE_UNAVAILABLE),
        }
    }
}

impl Service<Request<Incoming>> for BridgeService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.accept(req).await) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn request(method: Method, path: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::from_static(body)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_publish_queues_message() {
        let (tx, mut rx) = mpsc::channel(4);
        let service = BridgeService::new(tx);

        let response = service
            .accept(request(
                Method::POST,
                "/publish/msh/US/CA/socalmesh/2/e/LongFast/!43b6ff0c",
                b"\x0a\x00",
            ))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.topic, "msh/US/CA/socalmesh/2/e/LongFast/!43b6ff0c");
        assert_eq!(message.payload, Bytes::from_static(b"\x0a\x00"));
    }

    #[tokio::test]
    async fn test_topic_is_percent_decoded() {
        let (tx, mut rx) = mpsc::channel(4);
        let service = BridgeService::new(tx);

        let response = service
            .accept(request(
                Method::POST,
                "/publish/msh/US/CA/Bay%20Area/2/e/LongFast/!43b6ff0c",
                b"\x0a\x00",
            ))
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            rx.recv().await.unwrap().topic,
            "msh/US/CA/Bay Area/2/e/LongFast/!43b6ff0c"
        );

        let invalid = service
            .accept(request(Method::POST, "/publish/msh/%ff%fe", b""))
            .await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejected_requests() {
        let (tx, mut rx) = mpsc::channel(4);
        let service = BridgeService::new(tx);

        let cases = [
            (Method::GET, "/publish/msh/x", StatusCode::METHOD_NOT_ALLOWED),
            (Method::POST, "/publish/", StatusCode::BAD_REQUEST),
            (Method::POST, "/other", StatusCode::NOT_FOUND),
        ];
        for (method, path, status) in cases {
            assert_eq!(service.accept(request(method, path, b"")).await.status(), status);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_is_unavailable() {
        let (tx, _rx) = mpsc::channel(1);
        let service = BridgeService::new(tx);

        let first = service.accept(request(Method::POST, "/publish/msh/a", b"1")).await;
        assert_eq!(first.status(), StatusCode::ACCEPTED);
        let second = service.accept(request(Method::POST, "/publish/msh/a", b"2")).await;
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_oversized_body() {
        let (tx, _rx) = mpsc::channel(1);
        let service = BridgeService::new(tx);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/publish/msh/a")
            .body(Full::new(Bytes::from(vec![0u8; MAX_BODY_SIZE + 1])))
            .unwrap();
        assert_eq!(
            service.accept(req).await.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
