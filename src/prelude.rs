//! Convenient re-exports for common Hydra types.
pub use crate::{
    Classification, Client, ClientConfig, Error, NodeSelectionStrategy, RemoteError, Request,
    RequestBody, Response, RetryOnSocketException, RetryOnTimeout, ServerQosMode, Transport,
    TransportError, TransportRequest,
};
