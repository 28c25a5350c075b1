//! Adaptive concurrency limiter
//!
//! One limiter per (host, path prefix). The in-flight cap follows AIMD:
//! additive increase on success, multiplicative decrease when the server
//! sheds load. Acquisition is an async FIFO queue; a permit returns its
//! credit exactly once, on drop if not released explicitly.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use url::Url;

/// AIMD parameters for the in-flight cap.
#[derive(Debug, Clone)]
pub struct AimdConfig {
    /// Cap before any feedback.
    pub initial_limit: usize,
    /// Floor; the cap never collapses below this.
    pub min_limit: usize,
    /// Ceiling.
    pub max_limit: usize,
    /// Added to the cap on each success.
    pub increase_by: usize,
    /// Multiplier applied to the cap when the server sheds load (0..1).
    pub decrease_factor: f64,
}

impl Default for AimdConfig {
    fn default() -> Self {
        Self {
            initial_limit: 10,
            min_limit: 1,
            max_limit: 256,
            increase_by: 1,
            decrease_factor: 0.9,
        }
    }
}

impl AimdConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_limit(mut self, limit: usize) -> Self {
        self.initial_limit = limit;
        self
    }

    pub fn with_min_limit(mut self, limit: usize) -> Self {
        self.min_limit = limit;
        self
    }

    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    pub fn with_increase_by(mut self, amount: usize) -> Self {
        self.increase_by = amount;
        self
    }

    pub fn with_decrease_factor(mut self, factor: f64) -> Self {
        self.decrease_factor = factor;
        self
    }
}

/// The limiter was torn down while a request was still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("concurrency limiter closed while waiting for a permit")]
pub struct AcquireError;

enum Feedback {
    Success,
    Ignore,
    Dropped,
}

struct State {
    limit: usize,
    in_flight: usize,
    queue: VecDeque<oneshot::Sender<Permit>>,
}

struct Inner {
    state: Mutex<State>,
    config: AimdConfig,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(inner: &Arc<Inner>, feedback: Feedback) {
        let mut state = inner.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        match feedback {
            Feedback::Success => {
                state.limit =
                    state.limit.saturating_add(inner.config.increase_by).min(inner.config.max_limit);
            }
            Feedback::Dropped => {
                let decreased = (state.limit as f64 * inner.config.decrease_factor) as usize;
                state.limit = decreased.max(inner.config.min_limit);
            }
            Feedback::Ignore => {}
        }
        Self::grant_queued(inner, &mut state);
    }

    /// Hand freed capacity to queued acquirers in FIFO order. A receiver
    /// that gave up (dropped its future) surrenders the slot.
    fn grant_queued(inner: &Arc<Inner>, state: &mut State) {
        while state.in_flight < state.limit {
            let Some(tx) = state.queue.pop_front() else { break };
            state.in_flight += 1;
            let permit = Permit { inner: inner.clone(), released: false };
            if let Err(mut unclaimed) = tx.send(permit) {
                unclaimed.released = true;
                state.in_flight -= 1;
            }
        }
    }
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConcurrencyLimiter")
            .field("limit", &state.limit)
            .field("in_flight", &state.in_flight)
            .field("queued", &state.queue.len())
            .finish()
    }
}

/// In-flight credit for one attempt.
///
/// Exactly one of [`on_success`](Permit::on_success),
/// [`on_dropped`](Permit::on_dropped) or [`on_ignore`](Permit::on_ignore)
/// should be called; dropping an unreleased permit returns the credit with
/// no cap feedback.
#[derive(Debug)]
pub struct Permit {
    inner: Arc<Inner>,
    released: bool,
}

impl Permit {
    /// The attempt completed normally; grow the cap additively.
    pub fn on_success(mut self) {
        self.released = true;
        Inner::release(&self.inner, Feedback::Success);
    }

    /// The server shed load; shrink the cap multiplicatively.
    pub fn on_dropped(mut self) {
        self.released = true;
        Inner::release(&self.inner, Feedback::Dropped);
    }

    /// The outcome carries no load signal; return the credit unchanged.
    pub fn on_ignore(mut self) {
        self.released = true;
        Inner::release(&self.inner, Feedback::Ignore);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            Inner::release(&self.inner, Feedback::Ignore);
        }
    }
}

/// FIFO async semaphore with an AIMD-controlled cap.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

impl ConcurrencyLimiter {
    pub fn new(config: AimdConfig) -> Self {
        let initial = config.initial_limit.clamp(config.min_limit, config.max_limit);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    limit: initial,
                    in_flight: 0,
                    queue: VecDeque::new(),
                }),
                config,
            }),
        }
    }

    /// Wait for an in-flight credit. Dropping the returned future while
    /// queued surrenders the request without moving the cap.
    pub async fn acquire(&self) -> Result<Permit, AcquireError> {
        let rx = {
            let mut state = self.inner.lock();
            if state.in_flight < state.limit {
                state.in_flight += 1;
                return Ok(Permit { inner: self.inner.clone(), released: false });
            }
            let (tx, rx) = oneshot::channel();
            state.queue.push_back(tx);
            rx
        };
        rx.await.map_err(|_| AcquireError)
    }

    /// Current cap.
    pub fn limit(&self) -> usize {
        self.inner.lock().limit
    }

    /// Credits currently held.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight
    }

    /// Acquirers waiting in the queue.
    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }
}

/// Limiters keyed by (host, leading path segment).
#[derive(Debug)]
pub struct LimiterRegistry {
    config: AimdConfig,
    limiters: Mutex<HashMap<(String, String), ConcurrencyLimiter>>,
}

impl LimiterRegistry {
    pub fn new(config: AimdConfig) -> Self {
        Self { config, limiters: Mutex::new(HashMap::new()) }
    }

    pub fn limiter_for(&self, url: &Url) -> ConcurrencyLimiter {
        let key = limiter_key(url);
        self.limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(key)
            .or_insert_with(|| ConcurrencyLimiter::new(self.config.clone()))
            .clone()
    }
}

fn limiter_key(url: &Url) -> (String, String) {
    let host = format!(
        "{}:{}",
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    );
    let prefix = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .unwrap_or_default()
        .to_string();
    (host, prefix)
}
