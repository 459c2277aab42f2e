//! Relative-error latency sketch.
//!
//! Values land in logarithmic buckets of ratio `gamma = (1 + a) / (1 - a)`,
//! so any quantile is reported within relative accuracy `a` of a value that
//! was actually added. Memory grows with the log of the value range, not the
//! number of samples.

use std::collections::BTreeMap;

/// Values at or below this are counted as zero.
const MIN_TRACKED: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct LatencySketch {
    relative_accuracy: f64,
    ln_gamma: f64,
    buckets: BTreeMap<i32, u64>,
    zeros: u64,
    count: u64,
}

impl LatencySketch {
    pub fn new(relative_accuracy: f64) -> Self {
        let a = if relative_accuracy > 0.0 && relative_accuracy < 1.0 {
            relative_accuracy
        } else {
            0.01
        };
        let gamma = (1.0 + a) / (1.0 - a);
        Self {
            relative_accuracy: a,
            ln_gamma: gamma.ln(),
            buckets: BTreeMap::new(),
            zeros: 0,
            count: 0,
        }
    }

    pub fn relative_accuracy(&self) -> f64 {
        self.relative_accuracy
    }

    /// Negative and non-finite samples are ignored.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        self.count += 1;
        if value <= MIN_TRACKED {
            self.zeros += 1;
            return;
        }
        *self.buckets.entry(self.key(value)).or_default() += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `q` in `[0, 1]`; `None` when empty.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if self.count == 0 || !(0.0..=1.0).contains(&q) {
            return None;
        }
        let rank = q * (self.count - 1) as f64;
        let mut seen = self.zeros;
        if seen as f64 > rank {
            return Some(0.0);
        }
        for (&key, &n) in &self.buckets {
            seen += n;
            if seen as f64 > rank {
                return Some(self.value(key));
            }
        }
        self.buckets.keys().next_back().map(|&k| self.value(k))
    }

    /// Folds `other` in. Sketches with different accuracies are merged by
    /// re-bucketing at this sketch's accuracy.
    pub fn merge(&mut self, other: &LatencySketch) {
        self.zeros += other.zeros;
        self.count += other.count;
        let same = (self.ln_gamma - other.ln_gamma).abs() < f64::EPSILON;
        for (&key, &n) in &other.buckets {
            let key = if same { key } else { self.key(other.value(key)) };
            *self.buckets.entry(key).or_default() += n;
        }
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.zeros = 0;
        self.count = 0;
    }

    fn key(&self, value: f64) -> i32 {
        (value.ln() / self.ln_gamma).ceil() as i32
    }

    fn value(&self, key: i32) -> f64 {
        let gamma = self.ln_gamma.exp();
        2.0 * gamma.powi(key) / (gamma + 1.0)
    }
}

impl Default for LatencySketch {
    fn default() -> Self {
        Self::new(0.01)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn within(actual: f64, expected: f64, accuracy: f64) -> bool {
        (actual - expected).abs() <= expected * accuracy + 1e-12
    }

    #[test]
    fn quantiles_are_within_relative_accuracy() {
        let mut s = LatencySketch::new(0.01);
        for i in 1..=1000 {
            s.add(i as f64 / 1000.0);
        }
        assert_eq!(s.count(), 1000);
        assert!(within(s.quantile(0.5).unwrap(), 0.5, 0.01));
        assert!(within(s.quantile(0.9).unwrap(), 0.9, 0.01));
        assert!(within(s.quantile(0.99).unwrap(), 0.99, 0.01));
        assert!(within(s.quantile(1.0).unwrap(), 1.0, 0.01));
    }

    #[test]
    fn empty_and_degenerate_inputs() {
        let mut s = LatencySketch::default();
        assert_eq!(s.quantile(0.5), None);
        s.add(f64::NAN);
        s.add(-1.0);
        assert!(s.is_empty());
        s.add(0.0);
        assert_eq!(s.quantile(0.5), Some(0.0));
        assert_eq!(s.quantile(1.5), None);
    }

    #[test]
    fn merge_then_clear() {
        let mut a = LatencySketch::default();
        let mut b = LatencySketch::default();
        for _ in 0..10 {
            a.add(0.1);
            b.add(10.0);
        }
        a.merge(&b);
        assert_eq!(a.count(), 20);
        assert!(within(a.quantile(0.0).unwrap(), 0.1, 0.01));
        assert!(within(a.quantile(1.0).unwrap(), 10.0, 0.01));

        a.clear();
        assert!(a.is_empty());
        assert_eq!(a.quantile(0.9), None);
    }
}
