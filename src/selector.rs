//! URL selector
//!
//! Tracks per-node health over an ordered list of equivalent base URLs and
//! rebases request paths onto whichever node an attempt should target.
//! Selection is a hint: entries are read and written with per-node atomics
//! and no cross-node lock, so concurrent calls may briefly disagree about
//! the preferred node.

use crate::config::NodeSelectionStrategy;
use crate::time::Clock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Sentinel for a node with no recorded failure.
const HEALTHY: u64 = u64::MAX;

#[derive(Debug)]
struct Node {
    base: Url,
    failed_since_millis: AtomicU64,
}

impl Node {
    fn new(base: Url) -> Self {
        Self { base, failed_since_millis: AtomicU64::new(HEALTHY) }
    }

    /// Millis until this node leaves cooldown, `None` if selectable now.
    fn cooldown_remaining(&self, now: u64, cooldown: Duration) -> Option<u64> {
        let failed_since = self.failed_since_millis.load(Ordering::Acquire);
        if failed_since == HEALTHY {
            return None;
        }
        let cooldown_millis = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX);
        let elapsed = now.saturating_sub(failed_since);
        if elapsed >= cooldown_millis {
            None
        } else {
            Some(cooldown_millis - elapsed)
        }
    }
}

/// Ordered node list with health-aware selection.
#[derive(Debug)]
pub struct NodeSelector {
    nodes: Vec<Node>,
    /// Index of the currently preferred node.
    cursor: AtomicUsize,
    /// Start-index generator for the round-robin strategy.
    rotation: AtomicUsize,
    strategy: NodeSelectionStrategy,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl NodeSelector {
    /// `base_urls` must be non-empty (enforced by config validation).
    pub fn new(
        base_urls: Vec<Url>,
        strategy: NodeSelectionStrategy,
        cooldown: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        debug_assert!(!base_urls.is_empty());
        Self {
            nodes: base_urls.into_iter().map(Node::new).collect(),
            cursor: AtomicUsize::new(0),
            rotation: AtomicUsize::new(0),
            strategy,
            cooldown,
            clock,
        }
    }

    /// Rebase `request_url` onto the currently preferred node, or `None`
    /// when the URL is not rooted under any configured base.
    pub fn redirect_to_current(&self, request_url: &Url) -> Option<Url> {
        let (_, prefix_len) = self.locate(request_url)?;
        let start = match self.strategy {
            NodeSelectionStrategy::PinUntilError => self.cursor.load(Ordering::Acquire),
            NodeSelectionStrategy::RoundRobin => {
                self.rotation.fetch_add(1, Ordering::AcqRel) % self.nodes.len()
            }
        };
        let chosen = self.select_from(start, None)?;
        self.cursor.store(chosen, Ordering::Release);
        Some(rebase(&self.nodes[chosen].base, prefix_len, request_url))
    }

    /// Pick a node distinct from the one `request_url` targets, skipping
    /// entries still in cooldown; when every candidate is cooling down the
    /// one expiring soonest wins. A single-node list falls back to itself.
    pub fn redirect_to_next(&self, request_url: &Url) -> Option<Url> {
        let (idx, prefix_len) = self.locate(request_url)?;
        let n = self.nodes.len();
        let chosen = if n == 1 {
            self.select_from(0, None)?
        } else {
            self.select_from((idx + 1) % n, Some(idx))?
        };
        if chosen != idx {
            tracing::debug!(
                from = %self.nodes[idx].base,
                to = %self.nodes[chosen].base,
                "failing over to next node"
            );
        }
        self.cursor.store(chosen, Ordering::Release);
        Some(rebase(&self.nodes[chosen].base, prefix_len, request_url))
    }

    /// Follow an explicit server redirect. `target` must match a configured
    /// base by scheme and authority (path ignored); the request path is
    /// rebased onto that base.
    pub fn redirect_to(&self, request_url: &Url, target: &Url) -> Option<Url> {
        let (_, prefix_len) = self.locate(request_url)?;
        let idx = self.nodes.iter().position(|node| same_origin(&node.base, target))?;
        self.cursor.store(idx, Ordering::Release);
        Some(rebase(&self.nodes[idx].base, prefix_len, request_url))
    }

    pub fn mark_as_failed(&self, url: &Url) {
        if let Some(node) = self.find(url) {
            let now = self.clock.now_millis();
            let prev = node.failed_since_millis.swap(now, Ordering::AcqRel);
            if prev == HEALTHY {
                tracing::debug!(url = %node.base, "node marked failed");
            }
        }
    }

    pub fn mark_as_succeeded(&self, url: &Url) {
        if let Some(node) = self.find(url) {
            let prev = node.failed_since_millis.swap(HEALTHY, Ordering::AcqRel);
            if prev != HEALTHY {
                tracing::debug!(url = %node.base, "node recovered");
            }
        }
    }

    /// Whether the node serving `url` currently has a recorded failure.
    /// `None` when no configured base matches.
    pub fn is_failed(&self, url: &Url) -> Option<bool> {
        self.find(url)
            .map(|node| node.failed_since_millis.load(Ordering::Acquire) != HEALTHY)
    }

    pub fn base_urls(&self) -> impl Iterator<Item = &Url> {
        self.nodes.iter().map(|node| &node.base)
    }

    fn find(&self, url: &Url) -> Option<&Node> {
        self.nodes.iter().find(|node| same_origin(&node.base, url))
    }

    /// Longest base-path match for `url` across all nodes.
    fn locate(&self, url: &Url) -> Option<(usize, usize)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| base_prefix_len(&node.base, url).map(|len| (idx, len)))
            .max_by_key(|&(_, len)| len)
    }

    /// First selectable node scanning forward from `start`; when all are in
    /// cooldown, the node whose cooldown expires soonest.
    fn select_from(&self, start: usize, exclude: Option<usize>) -> Option<usize> {
        let n = self.nodes.len();
        let now = self.clock.now_millis();
        let mut soonest: Option<(u64, usize)> = None;
        for offset in 0..n {
            let idx = (start + offset) % n;
            if Some(idx) == exclude {
                continue;
            }
            match self.nodes[idx].cooldown_remaining(now, self.cooldown) {
                None => return Some(idx),
                Some(remaining) => {
                    if soonest.map_or(true, |(best, _)| remaining < best) {
                        soonest = Some((remaining, idx));
                    }
                }
            }
        }
        soonest.map(|(_, idx)| idx)
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Byte length of `base`'s path prefix within `url`, if `url` is rooted
/// under `base` (same origin, path segment boundary).
fn base_prefix_len(base: &Url, url: &Url) -> Option<usize> {
    if !same_origin(base, url) {
        return None;
    }
    let base_path = base.path().trim_end_matches('/');
    let path = url.path();
    if path == base_path {
        return Some(base_path.len());
    }
    if path.starts_with(base_path) && path.as_bytes().get(base_path.len()) == Some(&b'/') {
        return Some(base_path.len());
    }
    None
}

/// Graft the request's path suffix (and query/fragment) onto `target_base`.
fn rebase(target_base: &Url, prefix_len: usize, request_url: &Url) -> Url {
    let suffix = &request_url.path()[prefix_len..];
    let base_path = target_base.path().trim_end_matches('/');
    let mut path = String::with_capacity(base_path.len() + suffix.len());
    path.push_str(base_path);
    path.push_str(suffix);
    if path.is_empty() {
        path.push('/');
    }

    let mut rebased = target_base.clone();
    rebased.set_path(&path);
    rebased.set_query(request_url.query());
    rebased.set_fragment(request_url.fragment());
    rebased
}
