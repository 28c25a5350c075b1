#![forbid(unsafe_code)]

//! # Hydra
//!
//! Resilient multi-server HTTP call engine for async Rust. Given a request
//! and a set of equivalent base URLs, the engine dispatches to the
//! preferred node and transparently retries, fails over, or follows
//! server-directed redirects — honoring QoS signals (308/429/503), bounded
//! relocation budgets, exponential backoff with full jitter, and an
//! adaptive per-node concurrency cap.
//!
//! ## Features
//!
//! - **Retry and failover** across equivalent nodes with per-node health
//!   tracking and cooldowns
//! - **QoS awareness**: `Retry-After` honoring, 503 failover, 308
//!   redirects, optional propagation to the caller
//! - **Backoff with full jitter** bounded by a configurable retry budget
//! - **Adaptive concurrency** per (host, path prefix) with AIMD feedback
//! - **Cancellation** that is absorbing and leak-free on every path
//! - **Pluggable transport and time** seams for deterministic tests
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use http::StatusCode;
//! use hydra::{
//!     Client, ClientConfig, Request, Response, Transport, TransportError, TransportRequest,
//! };
//! use url::Url;
//!
//! #[derive(Debug)]
//! struct Echo;
//!
//! #[async_trait]
//! impl Transport for Echo {
//!     async fn send(&self, request: TransportRequest) -> Result<Response, TransportError> {
//!         let _ = request;
//!         Ok(Response::new(StatusCode::OK).with_body("pong"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder()
//!         .base_url(Url::parse("https://a.example/api")?)
//!         .base_url(Url::parse("https://b.example/api")?)
//!         .build()?;
//!     let client = Client::builder().config(config).transport(Echo).build()?;
//!
//!     let response = client
//!         .execute(Request::get(Url::parse("https://a.example/api/ping")?))
//!         .await?;
//!     assert_eq!(response.status(), StatusCode::OK);
//!     Ok(())
//! }
//! ```

mod backoff;
mod body;
mod classify;
mod client;
mod config;
mod engine;
mod error;
mod limiter;
mod selector;
mod time;
mod transport;

// Re-exports
pub use backoff::BackoffGenerator;
pub use body::{
    ByteBody, ByteStream, OneShotBody, Request, RequestBody, Response, TransportRequest,
};
pub use classify::{classify, decode_remote_error, parse_retry_after, Classification, RemoteError};
pub use client::{BuildError, CallHandle, Client, ClientBuilder, PendingCall};
pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, NodeSelectionStrategy,
    RetryOnSocketException, RetryOnTimeout, ServerQosMode,
};
pub use error::{Error, FailureCause};
pub use limiter::{AcquireError, AimdConfig, ConcurrencyLimiter, LimiterRegistry, Permit};
pub use selector::NodeSelector;
pub use time::{
    Clock, InstantSleeper, ManualClock, MonotonicClock, Sleeper, TokioSleeper, TrackingSleeper,
};
pub use transport::{Transport, TransportError};

pub mod prelude;
