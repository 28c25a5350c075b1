//! Request and response data model
//!
//! A [`Request`] is immutable for the lifetime of a logical call; the engine
//! derives one transport dispatch from it per attempt. Response bodies are
//! either handed to the caller untouched (success) or buffered exactly once
//! and closed (every retry path).

use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::fmt;
use std::io;
use std::sync::Mutex;
use url::Url;

/// Streaming byte payload, as produced or consumed by the transport.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Request body, classified by whether it can be sent more than once.
pub enum RequestBody {
    /// No body.
    Empty,
    /// Fully owned bytes; safe to send on every attempt.
    Replayable(Bytes),
    /// A stream that can be consumed exactly once. A call carrying one of
    /// these may never be retried after its first dispatch.
    OneShot(OneShotBody),
}

impl RequestBody {
    pub fn is_one_shot(&self) -> bool {
        matches!(self, RequestBody::OneShot(_))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Replayable(bytes) => {
                f.debug_tuple("Replayable").field(&bytes.len()).finish()
            }
            RequestBody::OneShot(body) => f
                .debug_struct("OneShot")
                .field("consumed", &body.is_consumed())
                .finish(),
        }
    }
}

/// Single-take wrapper around a streaming request body.
pub struct OneShotBody {
    stream: Mutex<Option<ByteStream>>,
}

impl OneShotBody {
    pub fn new(stream: ByteStream) -> Self {
        Self { stream: Mutex::new(Some(stream)) }
    }

    /// Move the stream out. Returns `None` once consumed.
    pub(crate) fn take(&self) -> Option<ByteStream> {
        self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take()
    }

    pub fn is_consumed(&self) -> bool {
        self.stream.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).is_none()
    }
}

/// Immutable description of the caller's operation.
///
/// The URL names a path under one of the client's configured base URLs; the
/// engine rebases it onto whichever node each attempt targets.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url, headers: HeaderMap::new(), body: RequestBody::Empty }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: Url) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Replayable bytes body.
    pub fn with_bytes(self, bytes: impl Into<Bytes>) -> Self {
        self.with_body(RequestBody::Replayable(bytes.into()))
    }

    /// One-shot streaming body; forbids retries after the first dispatch.
    pub fn with_stream(self, stream: ByteStream) -> Self {
        self.with_body(RequestBody::OneShot(OneShotBody::new(stream)))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }
}

/// Byte payload handed to the transport or received from it.
pub enum ByteBody {
    Empty,
    Bytes(Bytes),
    Stream(ByteStream),
}

impl ByteBody {
    /// Consume the body into owned bytes, closing the underlying stream.
    pub async fn buffer(self) -> io::Result<Bytes> {
        match self {
            ByteBody::Empty => Ok(Bytes::new()),
            ByteBody::Bytes(bytes) => Ok(bytes),
            ByteBody::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for ByteBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteBody::Empty => f.write_str("Empty"),
            ByteBody::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            ByteBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<Bytes> for ByteBody {
    fn from(bytes: Bytes) -> Self {
        ByteBody::Bytes(bytes)
    }
}

impl From<&'static str> for ByteBody {
    fn from(s: &'static str) -> Self {
        ByteBody::Bytes(Bytes::from_static(s.as_bytes()))
    }
}

/// One attempt's view of the request, rebased onto a concrete node.
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: ByteBody,
}

/// HTTP response as delivered by the transport.
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ByteBody,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self { status, headers: HeaderMap::new(), body: ByteBody::Empty }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<ByteBody>) -> Self {
        self.body = body.into();
        self
    }

    pub fn from_parts(status: StatusCode, headers: HeaderMap, body: ByteBody) -> Self {
        Self { status, headers, body }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &ByteBody {
        &self.body
    }

    pub fn into_body(self) -> ByteBody {
        self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, ByteBody) {
        (self.status, self.headers, self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&'static str]) -> ByteStream {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<io::Result<Bytes>>>(),
        )
        .boxed()
    }

    #[tokio::test]
    async fn buffer_collects_stream_chunks() {
        let body = ByteBody::Stream(chunks(&["hel", "lo"]));
        assert_eq!(body.buffer().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn buffer_propagates_stream_errors() {
        let parts: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"x")),
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "cut")),
        ];
        let body = ByteBody::Stream(stream::iter(parts).boxed());
        assert!(body.buffer().await.is_err());
    }

    #[test]
    fn one_shot_body_can_be_taken_once() {
        let body = OneShotBody::new(chunks(&["data"]));
        assert!(!body.is_consumed());
        assert!(body.take().is_some());
        assert!(body.is_consumed());
        assert!(body.take().is_none());
    }

    #[test]
    fn request_builder_accumulates_headers() {
        let url = Url::parse("https://a.example/api/x").unwrap();
        let request = Request::get(url)
            .with_header(http::header::ACCEPT, HeaderValue::from_static("application/json"))
            .with_bytes("payload");

        assert_eq!(request.method(), &Method::GET);
        assert_eq!(request.headers().len(), 1);
        assert!(matches!(request.body(), RequestBody::Replayable(b) if b.len() == 7));
        assert!(!request.body().is_one_shot());
    }
}
