//! Scripted transport shared by the call-engine integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderValue, Method, StatusCode};
use hydra::{ByteBody, Response, Transport, TransportError, TransportRequest};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

type Produce = Box<dyn FnOnce() -> Result<Response, TransportError> + Send>;

/// Route engine logs to the test output. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

/// One scripted outcome, consumed per dispatch in order.
pub enum Step {
    Respond(Produce),
    /// Resolve after a real delay (for cancellation races).
    Delayed(Duration, Produce),
}

pub fn respond(f: impl FnOnce() -> Result<Response, TransportError> + Send + 'static) -> Step {
    Step::Respond(Box::new(f))
}

pub fn ok(body: &'static str) -> Step {
    respond(move || Ok(Response::new(StatusCode::OK).with_body(body)))
}

pub fn status_with_body(code: StatusCode, body: &'static str) -> Step {
    respond(move || Ok(Response::new(code).with_body(body)))
}

pub fn redirect(location: &'static str) -> Step {
    respond(move || {
        Ok(Response::new(StatusCode::PERMANENT_REDIRECT)
            .with_header(http::header::LOCATION, HeaderValue::from_static(location)))
    })
}

pub fn throttle(retry_after_secs: Option<u64>) -> Step {
    respond(move || {
        let mut response = Response::new(StatusCode::TOO_MANY_REQUESTS);
        if let Some(secs) = retry_after_secs {
            response = response.with_header(
                http::header::RETRY_AFTER,
                HeaderValue::from_str(&secs.to_string()).unwrap(),
            );
        }
        Ok(response)
    })
}

pub fn unavailable() -> Step {
    respond(|| Ok(Response::new(StatusCode::SERVICE_UNAVAILABLE)))
}

pub fn connect_timeout() -> Step {
    respond(|| Err(TransportError::ConnectTimeout { elapsed: Duration::from_secs(10) }))
}

pub fn read_timeout() -> Step {
    respond(|| Err(TransportError::ReadTimeout { elapsed: Duration::from_secs(10) }))
}

pub fn delayed_ok(delay: Duration, body: &'static str) -> Step {
    Step::Delayed(
        delay,
        Box::new(move || Ok(Response::new(StatusCode::OK).with_body(body))),
    )
}

/// Flips a flag when the value it guards is dropped.
#[derive(Clone, Default)]
pub struct DropProbe {
    dropped: Arc<AtomicBool>,
}

impl DropProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

struct ProbeGuard(Arc<AtomicBool>);

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// A streaming body whose closure is observable through `probe`.
pub fn probed_body(chunks: &'static [&'static str], probe: &DropProbe) -> ByteBody {
    let guard = ProbeGuard(probe.dropped.clone());
    let stream = futures::stream::iter(
        chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect::<Vec<io::Result<Bytes>>>(),
    )
    .map(move |chunk| {
        let _ = &guard;
        chunk
    })
    .boxed();
    ByteBody::Stream(stream)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: Url,
}

/// Transport that replays a fixed script and records every dispatch.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Step>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockTransport {
    pub fn scripted(steps: Vec<Step>) -> Self {
        Self {
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_urls(&self) -> Vec<Url> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("remaining", &self.script.lock().unwrap().len())
            .field("dispatched", &self.requests.lock().unwrap().len())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<Response, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.clone(),
            url: request.url.clone(),
        });
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .expect("transport dispatched beyond the scripted steps");
        match step {
            Step::Respond(produce) => produce(),
            Step::Delayed(delay, produce) => {
                tokio::time::sleep(delay).await;
                produce()
            }
        }
    }
}
