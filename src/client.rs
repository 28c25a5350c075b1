//! Public client
//!
//! A [`Client`] owns the shared call-engine state (configuration, node
//! health, limiters, time seams) and hands out one [`PendingCall`] per
//! `execute`. Calls are cancellable through a detachable [`CallHandle`].

use crate::body::{Request, Response};
use crate::config::ClientConfig;
use crate::engine::{self, CancelFlag, Shared};
use crate::error::Error;
use crate::limiter::{AimdConfig, LimiterRegistry};
use crate::selector::NodeSelector;
use crate::time::{Clock, MonotonicClock, Sleeper, TokioSleeper};
use crate::transport::Transport;
use futures::future::BoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Errors returned while assembling a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("a client configuration is required")]
    MissingConfig,
    #[error("a transport is required")]
    MissingTransport,
}

/// Resilient multi-node HTTP call engine.
///
/// Cloning is cheap; clones share node health and limiter state.
#[derive(Debug, Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Start a logical call. Nothing runs until the returned future is
    /// polled; it resolves to exactly one terminal outcome.
    pub fn execute(&self, request: Request) -> PendingCall {
        let flag = Arc::new(CancelFlag::default());
        let handle = CallHandle { flag: flag.clone() };
        let future = Box::pin(engine::run(self.shared.clone(), request, flag));
        PendingCall { handle, future }
    }

    /// Cancel the call behind `handle`. Equivalent to `handle.cancel()`.
    pub fn cancel(&self, handle: &CallHandle) {
        handle.cancel();
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Node health and selection state, for inspection.
    pub fn selector(&self) -> &NodeSelector {
        &self.shared.selector
    }
}

impl tower_service::Service<Request> for Client {
    type Response = Response;
    type Error = Error;
    type Future = PendingCall;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.execute(request)
    }
}

/// Detachable cancellation handle for one logical call.
#[derive(Debug, Clone)]
pub struct CallHandle {
    flag: Arc<CancelFlag>,
}

impl CallHandle {
    /// Flip the call into its absorbing cancelled state. Idempotent.
    pub fn cancel(&self) {
        self.flag.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.is_cancelled()
    }
}

/// A logical call in flight. Await it for the terminal outcome.
pub struct PendingCall {
    handle: CallHandle,
    future: BoxFuture<'static, Result<Response, Error>>,
}

impl PendingCall {
    /// Handle for cancelling this call, usable from another task.
    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }
}

impl Future for PendingCall {
    type Output = Result<Response, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.future.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("cancelled", &self.handle.is_cancelled())
            .finish()
    }
}

/// Builder wiring configuration, transport, and optional time seams.
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn Transport>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    clock: Option<Arc<dyn Clock>>,
    limiter: Option<AimdConfig>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Override the backoff sleeper (useful for deterministic tests).
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Override the cooldown clock (useful for deterministic tests).
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Override the AIMD parameters of the per-node limiters.
    pub fn limiter(mut self, config: AimdConfig) -> Self {
        self.limiter = Some(config);
        self
    }

    pub fn build(self) -> Result<Client, BuildError> {
        let config = self.config.ok_or(BuildError::MissingConfig)?;
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::default()));
        let sleeper = self.sleeper.unwrap_or_else(|| Arc::new(TokioSleeper));
        let limiter = self
            .limiter
            .unwrap_or_else(|| AimdConfig::default().with_max_limit(config.max_concurrent_requests()));

        let selector = NodeSelector::new(
            config.base_urls().to_vec(),
            config.node_selection_strategy(),
            config.failed_url_cooldown(),
            clock.clone(),
        );
        Ok(Client {
            shared: Arc::new(Shared {
                limiters: LimiterRegistry::new(limiter),
                selector,
                config,
                transport,
                sleeper,
                clock,
            }),
        })
    }
}
