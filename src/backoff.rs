//! Backoff generator
//!
//! Exponential slots with full jitter: the k-th delay is drawn uniformly
//! from `[0, slot_size * 2^(k-1)]`. Full jitter is the schedule that keeps
//! independent clients from retrying in synchronized waves.

use rand::Rng;
use std::time::Duration;

/// Stateful producer of the delay before each retry.
///
/// Returns `None` once `max_num_retries` delays have been produced, and
/// exhaustion is sticky. Not thread-safe; each logical call owns one.
#[derive(Debug)]
pub struct BackoffGenerator {
    max_num_retries: u32,
    backoff_slot_size: Duration,
    retries_used: u32,
    exhausted: bool,
}

impl BackoffGenerator {
    pub fn new(max_num_retries: u32, backoff_slot_size: Duration) -> Self {
        Self { max_num_retries, backoff_slot_size, retries_used: 0, exhausted: false }
    }

    /// Next jittered delay, or `None` when the retry budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.next_backoff_with_rng(&mut rand::rng())
    }

    /// Same as [`next_backoff`](Self::next_backoff) with a caller-supplied
    /// RNG, for deterministic tests.
    pub fn next_backoff_with_rng<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if self.exhausted {
            return None;
        }
        if self.retries_used >= self.max_num_retries {
            self.exhausted = true;
            return None;
        }
        let exponent = self.retries_used;
        self.retries_used += 1;

        let multiplier = 2u32.saturating_pow(exponent);
        let ceiling = self
            .backoff_slot_size
            .checked_mul(multiplier)
            .unwrap_or(Duration::from_secs(u64::MAX));
        let ceiling_millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_millis == 0 {
            return Some(Duration::ZERO);
        }
        Some(Duration::from_millis(rng.random_range(0..=ceiling_millis)))
    }

    /// Delays produced so far.
    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted || self.retries_used >= self.max_num_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn produces_at_most_max_num_retries_delays() {
        let mut backoff = BackoffGenerator::new(3, Duration::from_millis(100));
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_some());
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn exhaustion_is_sticky() {
        let mut backoff = BackoffGenerator::new(1, Duration::from_millis(100));
        assert!(backoff.next_backoff().is_some());
        for _ in 0..10 {
            assert!(backoff.next_backoff().is_none());
        }
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn zero_retries_yields_nothing() {
        let mut backoff = BackoffGenerator::new(0, Duration::from_millis(100));
        assert!(backoff.next_backoff().is_none());
        assert!(backoff.is_exhausted());
    }

    #[test]
    fn delays_stay_within_doubling_slots() {
        let mut rng = StdRng::seed_from_u64(7);
        let slot = Duration::from_millis(100);
        let mut backoff = BackoffGenerator::new(5, slot);

        for k in 0..5u32 {
            let delay = backoff.next_backoff_with_rng(&mut rng).unwrap();
            let ceiling = slot * 2u32.pow(k);
            assert!(delay <= ceiling, "delay {delay:?} above slot ceiling {ceiling:?}");
        }
    }

    #[test]
    fn jitter_actually_varies() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let mut backoff = BackoffGenerator::new(1, Duration::from_secs(10));
            seen.insert(backoff.next_backoff_with_rng(&mut rng).unwrap());
        }
        assert!(seen.len() > 1, "expected jittered delays to differ");
    }

    #[test]
    fn huge_slots_saturate_instead_of_panicking() {
        let mut backoff = BackoffGenerator::new(64, Duration::from_secs(u64::MAX / 4));
        for _ in 0..64 {
            // Just exercising the saturating arithmetic.
            let _ = backoff.next_backoff();
        }
        assert!(backoff.next_backoff().is_none());
    }

    #[test]
    fn retries_used_counts_up() {
        let mut backoff = BackoffGenerator::new(2, Duration::from_millis(1));
        assert_eq!(backoff.retries_used(), 0);
        backoff.next_backoff();
        assert_eq!(backoff.retries_used(), 1);
        backoff.next_backoff();
        assert_eq!(backoff.retries_used(), 2);
        backoff.next_backoff();
        assert_eq!(backoff.retries_used(), 2);
    }
}
