//! Error types surfaced to callers
//!
//! A logical call terminates with exactly one of these. Intermediate
//! failures that were retried are only logged; the last one is attached to
//! the exhaustion error as its cause.

use crate::classify::RemoteError;
use crate::transport::TransportError;
use bytes::Bytes;
use http::StatusCode;
use std::fmt;
use url::Url;

/// Cap the body preview rendered into unknown-remote messages.
const BODY_PREVIEW_LIMIT: usize = 256;

/// The condition that ended the final attempt of an exhausted call.
#[derive(Debug)]
pub enum FailureCause {
    /// Transport-level IO failure.
    Io(TransportError),
    /// The server throttled the request (429).
    Throttled,
    /// The server reported itself unavailable (503).
    Unavailable,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{}", err),
            Self::Throttled => f.write_str("server throttled the request (429)"),
            Self::Unavailable => f.write_str("server reported unavailable (503)"),
        }
    }
}

/// Terminal outcome of a failed logical call.
#[derive(Debug)]
pub enum Error {
    /// The retry budget ran out (or IO retries are disabled) after attempt
    /// failures; `cause` is the last suppressed failure.
    AttemptsExhausted { attempts: u32, cause: FailureCause },
    /// The relocation budget hit zero while a URL change was required.
    RedirectsExhausted { relocations: u32 },
    /// A retry was required but the request body can only be sent once.
    BodyNotReplayable { cause: Option<FailureCause> },
    /// The server returned a structured error; never retried.
    Remote { status: StatusCode, error: RemoteError },
    /// The server returned an unstructured non-2xx; never retried.
    UnknownRemote { status: StatusCode, body: Bytes },
    /// The request URL is not rooted under any configured base URL.
    Unroutable { url: Url },
    /// The call was cancelled.
    Cancelled,
    /// Engine invariant violation; always logged before surfacing.
    Internal { message: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted { attempts, cause } => {
                write!(f, "call failed after {} attempt(s), last failure: {}", attempts, cause)
            }
            Self::RedirectsExhausted { relocations } => {
                write!(f, "too many redirects (relocation limit: {})", relocations)
            }
            Self::BodyNotReplayable { cause } => {
                write!(f, "a retry was required but the request body can only be sent once")?;
                if let Some(cause) = cause {
                    write!(f, " (after: {})", cause)?;
                }
                Ok(())
            }
            Self::Remote { status, error } => {
                write!(f, "server returned {}: {}", status, error)
            }
            Self::UnknownRemote { status, body } => {
                let preview = String::from_utf8_lossy(&body[..body.len().min(BODY_PREVIEW_LIMIT)]);
                write!(f, "server returned {} with unrecognized body: {}", status, preview)
            }
            Self::Unroutable { url } => {
                write!(f, "request URL {} is not rooted under any configured base URL", url)
            }
            Self::Cancelled => f.write_str("call cancelled"),
            Self::Internal { message } => write!(f, "internal client error: {}", message),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::AttemptsExhausted { cause: FailureCause::Io(err), .. } => Some(err),
            Self::BodyNotReplayable { cause: Some(FailureCause::Io(err)) } => Some(err),
            Self::Remote { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl Error {
    pub fn is_attempts_exhausted(&self) -> bool {
        matches!(self, Self::AttemptsExhausted { .. })
    }

    pub fn is_redirects_exhausted(&self) -> bool {
        matches!(self, Self::RedirectsExhausted { .. })
    }

    pub fn is_body_not_replayable(&self) -> bool {
        matches!(self, Self::BodyNotReplayable { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    pub fn is_unknown_remote(&self) -> bool {
        matches!(self, Self::UnknownRemote { .. })
    }

    pub fn is_unroutable(&self) -> bool {
        matches!(self, Self::Unroutable { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Status code for remote and unknown-remote outcomes.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Remote { status, .. } | Self::UnknownRemote { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Structured envelope for remote outcomes.
    pub fn remote_error(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The last suppressed failure for exhaustion outcomes.
    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Self::AttemptsExhausted { cause, .. } => Some(cause),
            Self::BodyNotReplayable { cause } => cause.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::io;
    use std::time::Duration;

    #[test]
    fn exhausted_display_names_attempts_and_cause() {
        let err = Error::AttemptsExhausted {
            attempts: 3,
            cause: FailureCause::Io(TransportError::ConnectTimeout {
                elapsed: Duration::from_secs(10),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("connect timed out"));
        assert!(err.is_attempts_exhausted());
    }

    #[test]
    fn source_chains_to_the_transport_failure() {
        let err = Error::AttemptsExhausted {
            attempts: 1,
            cause: FailureCause::Io(TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "refused",
            ))),
        };
        assert!(err.source().is_some());

        let qos = Error::AttemptsExhausted { attempts: 1, cause: FailureCause::Unavailable };
        assert!(qos.source().is_none());
    }

    #[test]
    fn unknown_remote_preview_is_bounded() {
        let err = Error::UnknownRemote {
            status: StatusCode::BAD_GATEWAY,
            body: Bytes::from(vec![b'x'; 10_000]),
        };
        assert!(err.to_string().len() < 1_000);
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn predicates_cover_all_variants() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::RedirectsExhausted { relocations: 2 }.is_redirects_exhausted());
        assert!(Error::BodyNotReplayable { cause: None }.is_body_not_replayable());
        assert!(Error::Internal { message: "m".into() }.is_internal());
        assert!(Error::Unroutable { url: Url::parse("https://x.example/a").unwrap() }
            .is_unroutable());
    }
}
