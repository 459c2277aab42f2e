//! Jittered exponential backoff for reconnects and session start.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata_core::config::BackoffConfig;

/// Delay `n` is `min(base * 2^n, cap) * U[0.5, 1.0)`; `None` once the retry
/// budget is spent.
#[derive(Debug)]
pub struct RandomizedExponentialBackoff {
    base: Duration,
    cap: Duration,
    max_retries: u32,
    attempt: u32,
    rng: StdRng,
}

impl RandomizedExponentialBackoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn seeded(config: &BackoffConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &BackoffConfig, rng: StdRng) -> Self {
        Self {
            base: config.base_delay(),
            cap: config.max_delay(),
            max_retries: config.max_retries,
            attempt: 0,
            rng,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        let ceiling = self.base.saturating_mul(factor).min(self.cap);
        self.attempt += 1;
        Some(ceiling.mul_f64(self.rng.gen_range(0.5..1.0)))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_jitter_bounds_and_cap() {
        let cfg = BackoffConfig {
            max_retries: 12,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        };
        let mut b = RandomizedExponentialBackoff::seeded(&cfg, 7);
        for n in 0..12u32 {
            let ceiling = Duration::from_millis((100u64 << n).min(2_000));
            let d = b.next_delay().unwrap();
            assert!(d >= ceiling / 2, "attempt {n}: {d:?} below {ceiling:?}/2");
            assert!(d < ceiling, "attempt {n}: {d:?} not below {ceiling:?}");
        }
        assert_eq!(b.next_delay(), None);
        assert_eq!(b.attempts(), 12);

        b.reset();
        assert!(b.next_delay().is_some());
    }

    #[test]
    fn huge_attempt_counts_saturate_at_the_cap() {
        let cfg = BackoffConfig {
            max_retries: 100,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        };
        let mut b = RandomizedExponentialBackoff::seeded(&cfg, 1);
        let mut last = Duration::ZERO;
        for _ in 0..100 {
            last = b.next_delay().unwrap();
        }
        assert!(last <= Duration::from_secs(60));
    }
}
