//! Response classifier
//!
//! Maps every response to exactly one classification. Non-2xx bodies are
//! buffered once, up front, so each rule below reads the same owned bytes;
//! success bodies pass through untouched.

use crate::body::{ByteBody, Response};
use crate::selector::NodeSelector;
use crate::transport::TransportError;
use bytes::Bytes;
use http::{header, HeaderMap, StatusCode};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};
use url::Url;

/// Structured error envelope returned by conforming servers.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteError {
    pub error_code: String,
    pub error_name: String,
    #[serde(default)]
    pub error_instance_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error_name, self.error_code)?;
        if !self.error_instance_id.is_empty() {
            write!(f, " [instance {}]", self.error_instance_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteError {}

/// Exactly one of these per classified response.
#[derive(Debug)]
pub enum Classification {
    /// 1xx/2xx; the body is forwarded to the caller unbuffered.
    Success(Response),
    /// 429: local load signal; retry the same node.
    Throttle { retry_after: Option<Duration>, response: Response },
    /// 503: the node asked to be left alone; fail over.
    Unavailable { response: Response },
    /// 308 whose `Location` resolved to a configured base; `location` is the
    /// request URL already rebased onto the target node.
    RetryOther { location: Url },
    /// Structured server error; never retried.
    Remote { status: StatusCode, error: RemoteError },
    /// Any other non-2xx; never retried.
    UnknownRemote { status: StatusCode, body: Bytes },
}

/// Classify `response` to the request it answered.
///
/// Buffering a streaming body can fail mid-read; that surfaces as a
/// transport error and the attempt is treated as an IO failure.
pub async fn classify(
    response: Response,
    selector: &NodeSelector,
    request_url: &Url,
) -> Result<Classification, TransportError> {
    if response.status().as_u16() / 100 <= 2 {
        return Ok(Classification::Success(response));
    }

    let (status, headers, body) = response.into_parts();
    let bytes = body.buffer().await?;

    if status == StatusCode::PERMANENT_REDIRECT {
        if let Some(target) = redirect_target(&headers, selector, request_url) {
            return Ok(Classification::RetryOther { location: target });
        }
        // A 308 the client cannot follow falls through below.
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(Classification::Throttle {
            retry_after: parse_retry_after(&headers),
            response: Response::from_parts(status, headers, ByteBody::Bytes(bytes)),
        });
    } else if status == StatusCode::SERVICE_UNAVAILABLE {
        return Ok(Classification::Unavailable {
            response: Response::from_parts(status, headers, ByteBody::Bytes(bytes)),
        });
    }

    match decode_remote_error(&bytes) {
        Some(error) => Ok(Classification::Remote { status, error }),
        None => Ok(Classification::UnknownRemote { status, body: bytes }),
    }
}

/// Decode the structured error envelope; any mismatch is `None`.
pub fn decode_remote_error(body: &[u8]) -> Option<RemoteError> {
    serde_json::from_slice(body).ok()
}

/// Resolve a `Location` header against the configured bases. Relative
/// locations resolve against the request URL first.
fn redirect_target(
    headers: &HeaderMap,
    selector: &NodeSelector,
    request_url: &Url,
) -> Option<Url> {
    let raw = headers.get(header::LOCATION)?.to_str().ok()?;
    let location = request_url.join(raw).ok()?;
    selector.redirect_to(request_url, &location)
}

/// Parse `Retry-After` per RFC 7231: delta-seconds or an HTTP-date.
/// Malformed values and dates in the past yield `None`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?.to_str().ok()?;
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds as u64));
    }

    let parsed = httpdate::parse_http_date(trimmed).ok()?;
    parsed.duration_since(SystemTime::now()).ok()
}
