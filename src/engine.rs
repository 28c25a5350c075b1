//! Call engine
//!
//! Drives one logical call through attempts: acquire an in-flight credit,
//! dispatch, classify, then return or schedule a retry, failover, or
//! explicit redirect. Exactly one terminal outcome reaches the caller, and
//! every acquired credit is returned on every exit path.

use crate::backoff::BackoffGenerator;
use crate::body::{ByteBody, Request, RequestBody, Response, TransportRequest};
use crate::classify::{classify, Classification};
use crate::config::{ClientConfig, RetryOnSocketException, RetryOnTimeout, ServerQosMode};
use crate::error::{Error, FailureCause};
use crate::limiter::LimiterRegistry;
use crate::selector::NodeSelector;
use crate::time::{Clock, Sleeper};
use crate::transport::{Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use url::Url;

/// Everything a call needs that outlives any single call.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) selector: NodeSelector,
    pub(crate) limiters: LimiterRegistry,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Cooperative cancellation flag shared between a call and its handle.
///
/// Once flipped it is absorbing: no further attempt is dispatched, pending
/// backoff timers resolve to the cancellation error, and a response racing
/// the flag is dropped with its body closed.
#[derive(Debug, Default)]
pub(crate) struct CancelFlag {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One dispatch of a logical call. Created before the backoff delay so the
/// attempt's observed duration includes the wait.
#[derive(Debug)]
struct Attempt {
    number: u32,
    url: Url,
    started_millis: u64,
}

/// Run one logical call to its single terminal outcome.
pub(crate) async fn run(
    shared: Arc<Shared>,
    request: Request,
    cancel: Arc<CancelFlag>,
) -> Result<Response, Error> {
    let initial_url = shared
        .selector
        .redirect_to_current(request.url())
        .ok_or_else(|| Error::Unroutable { url: request.url().clone() })?;

    let mut backoff = BackoffGenerator::new(
        shared.config.max_num_retries(),
        shared.config.backoff_slot_size(),
    );
    let mut remaining_relocations = shared.config.max_num_relocations();
    let mut one_shot_dispatched = false;
    let mut attempt = Attempt {
        number: 1,
        url: initial_url,
        started_millis: shared.clock.now_millis(),
    };

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let limiter = shared.limiters.limiter_for(&attempt.url);
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            acquired = limiter.acquire() => {
                acquired.map_err(|err| internal(err.to_string()))?
            }
        };

        let body = match request.body() {
            RequestBody::Empty => ByteBody::Empty,
            RequestBody::Replayable(bytes) => ByteBody::Bytes(bytes.clone()),
            RequestBody::OneShot(stream) => match stream.take() {
                Some(stream) => ByteBody::Stream(stream),
                // The retry gate must fire before a second dispatch is ever
                // scheduled, so an empty slot here is an engine bug.
                None => {
                    permit.on_ignore();
                    return Err(internal("one-shot request body consumed twice"));
                }
            },
        };
        if request.body().is_one_shot() {
            one_shot_dispatched = true;
        }

        let transport_request = TransportRequest {
            method: request.method().clone(),
            url: attempt.url.clone(),
            headers: request.headers().clone(),
            body,
        };
        tracing::debug!(attempt = attempt.number, url = %attempt.url, "dispatching attempt");

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // A response racing the flag is dropped here, body and all.
                permit.on_ignore();
                return Err(Error::Cancelled);
            }
            result = shared.transport.send(transport_request) => result,
        };

        // Health updates precede classification.
        let classified: Result<Classification, TransportError> = match sent {
            Err(err) => {
                shared.selector.mark_as_failed(&attempt.url);
                Err(err)
            }
            Ok(response) => {
                shared.selector.mark_as_succeeded(&attempt.url);
                let classified = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // Buffering stops and the partial body is closed.
                        permit.on_ignore();
                        return Err(Error::Cancelled);
                    }
                    classified = classify(response, &shared.selector, &attempt.url) => classified,
                };
                if classified.is_err() {
                    // The body died mid-read; an IO outcome for this node.
                    shared.selector.mark_as_failed(&attempt.url);
                }
                classified
            }
        };

        let elapsed_ms = shared.clock.now_millis().saturating_sub(attempt.started_millis);

        match classified {
            Ok(Classification::Success(response)) => {
                tracing::debug!(
                    attempt = attempt.number,
                    url = %attempt.url,
                    elapsed_ms,
                    "attempt succeeded"
                );
                permit.on_success();
                return Ok(response);
            }

            Ok(Classification::Remote { status, error }) => {
                permit.on_ignore();
                return Err(Error::Remote { status, error });
            }

            Ok(Classification::UnknownRemote { status, body }) => {
                permit.on_ignore();
                return Err(Error::UnknownRemote { status, body });
            }

            Ok(Classification::RetryOther { location }) => {
                permit.on_ignore();
                tracing::info!(
                    attempt = attempt.number,
                    url = %attempt.url,
                    location = %location,
                    "server redirected to another node"
                );
                if one_shot_dispatched {
                    return Err(Error::BodyNotReplayable { cause: None });
                }
                if remaining_relocations == 0 {
                    return Err(Error::RedirectsExhausted {
                        relocations: shared.config.max_num_relocations(),
                    });
                }
                remaining_relocations -= 1;
                attempt = Attempt {
                    number: attempt.number + 1,
                    url: location,
                    started_millis: shared.clock.now_millis(),
                };
                // Explicit redirects retry immediately, without backoff.
            }

            Ok(Classification::Throttle { retry_after, response }) => {
                if shared.config.server_qos_mode() == ServerQosMode::PropagateToCaller {
                    permit.on_ignore();
                    return Ok(response);
                }
                permit.on_dropped();
                drop(response);
                if one_shot_dispatched {
                    return Err(Error::BodyNotReplayable {
                        cause: Some(FailureCause::Throttled),
                    });
                }
                // The budget is consumed even when Retry-After names the
                // delay, bounding total attempts.
                let Some(slot) = backoff.next_backoff() else {
                    return Err(Error::AttemptsExhausted {
                        attempts: attempt.number,
                        cause: FailureCause::Throttled,
                    });
                };
                let delay = retry_after.unwrap_or(slot);
                tracing::info!(
                    attempt = attempt.number,
                    url = %attempt.url,
                    delay_ms = delay.as_millis() as u64,
                    "throttled; retrying same node"
                );
                // Throttling is a local load signal; stay on this node.
                attempt = Attempt {
                    number: attempt.number + 1,
                    url: attempt.url.clone(),
                    started_millis: shared.clock.now_millis(),
                };
                sleep_cancellable(&shared, &cancel, delay).await?;
            }

            Ok(Classification::Unavailable { response }) => {
                if shared.config.server_qos_mode() == ServerQosMode::PropagateToCaller {
                    permit.on_ignore();
                    return Ok(response);
                }
                permit.on_dropped();
                drop(response);
                // The node asked to be left alone; treat it as unhealthy so
                // selection skips it for the cooldown window.
                shared.selector.mark_as_failed(&attempt.url);
                if one_shot_dispatched {
                    return Err(Error::BodyNotReplayable {
                        cause: Some(FailureCause::Unavailable),
                    });
                }
                let Some(delay) = backoff.next_backoff() else {
                    return Err(Error::AttemptsExhausted {
                        attempts: attempt.number,
                        cause: FailureCause::Unavailable,
                    });
                };
                let Some(next_url) = shared.selector.redirect_to_next(&attempt.url) else {
                    return Err(Error::AttemptsExhausted {
                        attempts: attempt.number,
                        cause: FailureCause::Unavailable,
                    });
                };
                relocate(
                    &mut remaining_relocations,
                    &attempt.url,
                    &next_url,
                    shared.config.max_num_relocations(),
                )?;
                tracing::info!(
                    attempt = attempt.number,
                    url = %attempt.url,
                    next = %next_url,
                    delay_ms = delay.as_millis() as u64,
                    "node unavailable; failing over"
                );
                attempt = Attempt {
                    number: attempt.number + 1,
                    url: next_url,
                    started_millis: shared.clock.now_millis(),
                };
                sleep_cancellable(&shared, &cancel, delay).await?;
            }

            Err(io) => {
                permit.on_ignore();
                tracing::info!(
                    attempt = attempt.number,
                    url = %attempt.url,
                    elapsed_ms,
                    error = %io,
                    "attempt failed with i/o error"
                );
                if !io_retryable(&shared.config, &io) {
                    return Err(Error::AttemptsExhausted {
                        attempts: attempt.number,
                        cause: FailureCause::Io(io),
                    });
                }
                if one_shot_dispatched {
                    return Err(Error::BodyNotReplayable {
                        cause: Some(FailureCause::Io(io)),
                    });
                }
                let Some(delay) = backoff.next_backoff() else {
                    return Err(Error::AttemptsExhausted {
                        attempts: attempt.number,
                        cause: FailureCause::Io(io),
                    });
                };
                let Some(next_url) = shared.selector.redirect_to_next(&attempt.url) else {
                    return Err(Error::AttemptsExhausted {
                        attempts: attempt.number,
                        cause: FailureCause::Io(io),
                    });
                };
                relocate(
                    &mut remaining_relocations,
                    &attempt.url,
                    &next_url,
                    shared.config.max_num_relocations(),
                )?;
                attempt = Attempt {
                    number: attempt.number + 1,
                    url: next_url,
                    started_millis: shared.clock.now_millis(),
                };
                sleep_cancellable(&shared, &cancel, delay).await?;
            }
        }
    }
}

/// Spend a unit of relocation budget when the target URL actually changes.
/// In-place retries are free.
fn relocate(
    remaining: &mut u32,
    current: &Url,
    next: &Url,
    limit: u32,
) -> Result<(), Error> {
    if next == current {
        return Ok(());
    }
    if *remaining == 0 {
        return Err(Error::RedirectsExhausted { relocations: limit });
    }
    *remaining -= 1;
    Ok(())
}

fn io_retryable(config: &ClientConfig, err: &TransportError) -> bool {
    if config.retry_on_socket_exception() == RetryOnSocketException::DangerousDisabled {
        return false;
    }
    match err {
        // A read timeout may have committed server-side; retrying it must
        // be opted into explicitly.
        TransportError::ReadTimeout { .. } => {
            config.retry_on_timeout() == RetryOnTimeout::DangerousEnable
        }
        _ => true,
    }
}

async fn sleep_cancellable(
    shared: &Shared,
    cancel: &CancelFlag,
    delay: Duration,
) -> Result<(), Error> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = shared.sleeper.sleep(delay) => Ok(()),
    }
}

fn internal(message: impl Into<String>) -> Error {
    let message = message.into();
    tracing::error!(%message, "internal client error");
    Error::Internal { message }
}
