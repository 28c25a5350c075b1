//! Transport seam
//!
//! The engine never opens sockets itself; it hands each attempt to a
//! [`Transport`] and interprets the outcome. Implementations must report
//! connect and read timeouts as distinct variants rather than by message
//! text, since the retry policy treats them differently.

use crate::body::{Response, TransportRequest};
use async_trait::async_trait;
use std::io;
use std::time::Duration;

/// IO-class failures surfaced by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection could not be established within the deadline.
    #[error("connect timed out after {elapsed:?}")]
    ConnectTimeout { elapsed: Duration },
    /// The connection was established but the response did not arrive in
    /// time. The server may have executed the operation.
    #[error("read timed out after {elapsed:?}")]
    ReadTimeout { elapsed: Duration },
    /// Any other socket-level failure (refused, reset, DNS, TLS, mid-body
    /// read errors).
    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    pub fn is_connect_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    pub fn is_read_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout { .. })
    }

    pub fn is_timeout(&self) -> bool {
        self.is_connect_timeout() || self.is_read_timeout()
    }
}

/// One-attempt HTTP dispatch.
///
/// Cancellation is cooperative: dropping the returned future must abandon the
/// exchange and close any partially received body.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: TransportRequest) -> Result<Response, TransportError>;
}
