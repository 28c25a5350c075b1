//! Client configuration
//!
//! Mirrors the options a service-config file can name, with validation at
//! build time so the engine never re-checks them per call.

use std::time::Duration;
use url::Url;

/// How server load signals (429/503) are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerQosMode {
    /// The client absorbs QoS responses and retries per policy.
    #[default]
    AutomaticRetry,
    /// QoS responses are forwarded to the caller unchanged.
    PropagateToCaller,
}

/// Whether read timeouts may be retried.
///
/// Retrying a read timeout is unsafe for non-idempotent operations: the
/// server may have executed the request before the response was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryOnTimeout {
    #[default]
    Disabled,
    DangerousEnable,
}

/// Whether socket-level failures may be retried at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryOnSocketException {
    #[default]
    Enabled,
    DangerousDisabled,
}

/// How the selector picks the starting node for a logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeSelectionStrategy {
    /// Stay on the node that last produced a non-failed response.
    #[default]
    PinUntilError,
    /// Rotate the starting node on every logical call.
    RoundRobin,
}

/// Errors returned while validating a [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one base URL is required")]
    NoBaseUrls,
    #[error("base URL cannot be used as a base: {0}")]
    InvalidBaseUrl(Url),
    #[error("backoff_slot_size must be > 0")]
    ZeroBackoffSlot,
    #[error("max_concurrent_requests must be > 0")]
    ZeroConcurrencyCap,
}

/// Immutable per-client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    base_urls: Vec<Url>,
    max_num_retries: u32,
    backoff_slot_size: Duration,
    max_num_relocations: u32,
    failed_url_cooldown: Duration,
    server_qos_mode: ServerQosMode,
    retry_on_timeout: RetryOnTimeout,
    retry_on_socket_exception: RetryOnSocketException,
    node_selection_strategy: NodeSelectionStrategy,
    max_concurrent_requests: usize,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    pub fn base_urls(&self) -> &[Url] {
        &self.base_urls
    }

    pub fn max_num_retries(&self) -> u32 {
        self.max_num_retries
    }

    pub fn backoff_slot_size(&self) -> Duration {
        self.backoff_slot_size
    }

    pub fn max_num_relocations(&self) -> u32 {
        self.max_num_relocations
    }

    pub fn failed_url_cooldown(&self) -> Duration {
        self.failed_url_cooldown
    }

    pub fn server_qos_mode(&self) -> ServerQosMode {
        self.server_qos_mode
    }

    pub fn retry_on_timeout(&self) -> RetryOnTimeout {
        self.retry_on_timeout
    }

    pub fn retry_on_socket_exception(&self) -> RetryOnSocketException {
        self.retry_on_socket_exception
    }

    pub fn node_selection_strategy(&self) -> NodeSelectionStrategy {
        self.node_selection_strategy
    }

    /// Ceiling for the adaptive in-flight cap of each (host, path) limiter.
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests
    }
}

/// Builder with validation; unspecified limits derive from the URL count.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    base_urls: Vec<Url>,
    max_num_retries: Option<u32>,
    backoff_slot_size: Option<Duration>,
    max_num_relocations: Option<u32>,
    failed_url_cooldown: Option<Duration>,
    server_qos_mode: ServerQosMode,
    retry_on_timeout: RetryOnTimeout,
    retry_on_socket_exception: RetryOnSocketException,
    node_selection_strategy: NodeSelectionStrategy,
    max_concurrent_requests: Option<usize>,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: Url) -> Self {
        self.base_urls.push(url);
        self
    }

    pub fn base_urls(mut self, urls: impl IntoIterator<Item = Url>) -> Self {
        self.base_urls.extend(urls);
        self
    }

    pub fn max_num_retries(mut self, retries: u32) -> Self {
        self.max_num_retries = Some(retries);
        self
    }

    pub fn backoff_slot_size(mut self, slot: Duration) -> Self {
        self.backoff_slot_size = Some(slot);
        self
    }

    pub fn max_num_relocations(mut self, relocations: u32) -> Self {
        self.max_num_relocations = Some(relocations);
        self
    }

    pub fn failed_url_cooldown(mut self, cooldown: Duration) -> Self {
        self.failed_url_cooldown = Some(cooldown);
        self
    }

    pub fn server_qos_mode(mut self, mode: ServerQosMode) -> Self {
        self.server_qos_mode = mode;
        self
    }

    pub fn retry_on_timeout(mut self, mode: RetryOnTimeout) -> Self {
        self.retry_on_timeout = mode;
        self
    }

    pub fn retry_on_socket_exception(mut self, mode: RetryOnSocketException) -> Self {
        self.retry_on_socket_exception = mode;
        self
    }

    pub fn node_selection_strategy(mut self, strategy: NodeSelectionStrategy) -> Self {
        self.node_selection_strategy = strategy;
        self
    }

    pub fn max_concurrent_requests(mut self, cap: usize) -> Self {
        self.max_concurrent_requests = Some(cap);
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.base_urls.is_empty() {
            return Err(ConfigError::NoBaseUrls);
        }
        for url in &self.base_urls {
            if url.cannot_be_a_base() {
                return Err(ConfigError::InvalidBaseUrl(url.clone()));
            }
        }
        let slot = self.backoff_slot_size.unwrap_or(Duration::from_millis(250));
        if slot.is_zero() {
            return Err(ConfigError::ZeroBackoffSlot);
        }
        let cap = self.max_concurrent_requests.unwrap_or(256);
        if cap == 0 {
            return Err(ConfigError::ZeroConcurrencyCap);
        }

        let derived = 2 * self.base_urls.len() as u32;
        Ok(ClientConfig {
            max_num_retries: self.max_num_retries.unwrap_or(derived),
            max_num_relocations: self.max_num_relocations.unwrap_or(derived),
            base_urls: self.base_urls,
            backoff_slot_size: slot,
            failed_url_cooldown: self.failed_url_cooldown.unwrap_or(Duration::ZERO),
            server_qos_mode: self.server_qos_mode,
            retry_on_timeout: self.retry_on_timeout,
            retry_on_socket_exception: self.retry_on_socket_exception,
            node_selection_strategy: self.node_selection_strategy,
            max_concurrent_requests: cap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn defaults_derive_from_url_count() {
        let config = ClientConfig::builder()
            .base_url(url("https://a.example/api"))
            .base_url(url("https://b.example/api"))
            .base_url(url("https://c.example/api"))
            .build()
            .unwrap();

        assert_eq!(config.max_num_retries(), 6);
        assert_eq!(config.max_num_relocations(), 6);
        assert_eq!(config.backoff_slot_size(), Duration::from_millis(250));
        assert_eq!(config.failed_url_cooldown(), Duration::ZERO);
        assert_eq!(config.server_qos_mode(), ServerQosMode::AutomaticRetry);
        assert_eq!(config.retry_on_timeout(), RetryOnTimeout::Disabled);
        assert_eq!(config.retry_on_socket_exception(), RetryOnSocketException::Enabled);
        assert_eq!(config.node_selection_strategy(), NodeSelectionStrategy::PinUntilError);
    }

    #[test]
    fn explicit_values_win_over_defaults() {
        let config = ClientConfig::builder()
            .base_url(url("https://a.example"))
            .max_num_retries(7)
            .max_num_relocations(1)
            .backoff_slot_size(Duration::from_millis(10))
            .failed_url_cooldown(Duration::from_secs(30))
            .server_qos_mode(ServerQosMode::PropagateToCaller)
            .build()
            .unwrap();

        assert_eq!(config.max_num_retries(), 7);
        assert_eq!(config.max_num_relocations(), 1);
        assert_eq!(config.backoff_slot_size(), Duration::from_millis(10));
        assert_eq!(config.failed_url_cooldown(), Duration::from_secs(30));
        assert_eq!(config.server_qos_mode(), ServerQosMode::PropagateToCaller);
    }

    #[test]
    fn empty_base_urls_rejected() {
        assert_eq!(ClientConfig::builder().build().unwrap_err(), ConfigError::NoBaseUrls);
    }

    #[test]
    fn zero_slot_rejected() {
        let err = ClientConfig::builder()
            .base_url(url("https://a.example"))
            .backoff_slot_size(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroBackoffSlot);
    }

    #[test]
    fn non_base_url_rejected() {
        let err = ClientConfig::builder()
            .base_url(url("data:text/plain,hi"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl(_)));
    }

    #[test]
    fn zero_concurrency_cap_rejected() {
        let err = ClientConfig::builder()
            .base_url(url("https://a.example"))
            .max_concurrent_requests(0)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroConcurrencyCap);
    }
}
