//! Streaming histogram with a fixed bin budget.
//!
//! Bins are (centroid, weight) pairs kept sorted by centroid. Inserting a
//! sample outside the current shape merges the two nearest neighbours to
//! stay within the budget (Ben-Haim & Tom-Tov). Weights are decayed by the
//! owning accumulator, which makes derived quantiles decaying-window
//! approximations.

use crate::math;
use std::cmp::Ordering;

/// Weights below this are dropped during decay to keep bins meaningful.
const NEGLIGIBLE_WEIGHT: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct Histogram {
    bins: Vec<(f64, f64)>,
    max_bins: usize,
}

impl Histogram {
    /// Create an empty histogram with a bin budget.
    pub fn new(max_bins: usize) -> Self {
        Self {
            bins: Vec::with_capacity(max_bins.max(1) + 1),
            max_bins: max_bins.max(1),
        }
    }

    /// Insert a unit-weight sample.
    pub fn insert(&mut self, value: f64) {
        match self
            .bins
            .binary_search_by(|(center, _)| math::cmp(*center, value))
        {
            Ok(index) => self.bins[index].1 += 1.0,
            Err(index) => {
                self.bins.insert(index, (value, 1.0));
                if self.bins.len() > self.max_bins {
                    self.merge_closest();
                }
            },
        }
    }

    /// Scale every bin weight, dropping bins that decay to nothing.
    pub fn decay(&mut self, factor: f64) {
        for bin in &mut self.bins {
            bin.1 *= factor;
        }
        self.bins.retain(|(_, weight)| *weight > NEGLIGIBLE_WEIGHT);
    }

    /// Merge the adjacent pair with the smallest centroid gap.
    fn merge_closest(&mut self) {
        let mut closest = 0;
        let mut closest_gap = f64::INFINITY;
        for i in 0..self.bins.len() - 1 {
            let gap = self.bins[i + 1].0 - self.bins[i].0;
            if gap < closest_gap {
                closest_gap = gap;
                closest = i;
            }
        }

        let (left_center, left_weight) = self.bins[closest];
        let (right_center, right_weight) = self.bins[closest + 1];
        let weight = left_weight + right_weight;
        let center = (left_center * left_weight + right_center * right_weight) / weight;
        self.bins[closest] = (center, weight);
        self.bins.remove(closest + 1);
    }

    /// Total weight across all bins.
    pub fn total_weight(&self) -> f64 {
        self.bins.iter().map(|(_, weight)| weight).sum()
    }

    /// The current (centroid, weight) bins, ascending by centroid.
    pub fn bins(&self) -> &[(f64, f64)] {
        &self.bins
    }

    /// Approximate quantile by linear interpolation between centroids.
    ///
    /// Returns 0 for an empty histogram; `p` is clamped to [0, 1].
    pub fn quantile(&self, p: f64) -> f64 {
        if self.bins.is_empty() {
            return 0.0;
        }
        if self.bins.len() == 1 {
            return self.bins[0].0;
        }

        let p = p.clamp(0.0, 1.0);
        let target = p * self.total_weight();

        // Each bin contributes half its weight before its centroid.
        let mut cumulative = self.bins[0].1 / 2.0;
        if target <= cumulative {
            return self.bins[0].0;
        }

        for window in self.bins.windows(2) {
            let (left_center, left_weight) = window[0];
            let (right_center, right_weight) = window[1];
            let span = (left_weight + right_weight) / 2.0;

            if target <= cumulative + span {
                let fraction = (target - cumulative) / span;
                return left_center + fraction * (right_center - left_center);
            }
            cumulative += span;
        }

        self.bins[self.bins.len() - 1].0
    }

    /// Shannon entropy (nats) of the normalized bin weights.
    pub fn entropy(&self) -> f64 {
        let total = self.total_weight();
        if total <= 0.0 {
            return 0.0;
        }
        -self
            .bins
            .iter()
            .filter(|(_, weight)| *weight > 0.0)
            .map(|(_, weight)| {
                let p = weight / total;
                p * p.ln()
            })
            .sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_keeps_bin_budget() {
        let mut histogram = Histogram::new(4);
        for i in 0..100 {
            histogram.insert(i as f64);
        }
        assert!(histogram.bins().len() <= 4);
        let total = histogram.total_weight();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_values_share_a_bin() {
        let mut histogram = Histogram::new(8);
        for _ in 0..10 {
            histogram.insert(5.0);
        }
        assert_eq!(histogram.bins().len(), 1);
        assert_eq!(histogram.bins()[0], (5.0, 10.0));
    }

    #[test]
    fn test_bins_stay_sorted() {
        let mut histogram = Histogram::new(6);
        for value in [9.0, 1.0, 5.0, 3.0, 7.0, 2.0, 8.0, 4.0] {
            histogram.insert(value);
        }
        let bins = histogram.bins();
        for window in bins.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
    }

    #[test]
    fn test_median_of_uniform_samples() {
        let mut histogram = Histogram::new(20);
        for i in 1..=1000 {
            histogram.insert(i as f64);
        }
        let median = histogram.quantile(0.5);
        assert!((median - 500.0).abs() < 50.0, "median {median}");

        let p95 = histogram.quantile(0.95);
        assert!((p95 - 950.0).abs() < 50.0, "p95 {p95}");
    }

    #[test]
    fn test_quantile_edges() {
        let mut histogram = Histogram::new(10);
        for value in [1.0, 2.0, 3.0] {
            histogram.insert(value);
        }
        assert_eq!(histogram.quantile(0.0), 1.0);
        assert_eq!(histogram.quantile(1.0), 3.0);
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::new(10);
        assert_eq!(histogram.quantile(0.5), 0.0);
        assert_eq!(histogram.entropy(), 0.0);
        assert_eq!(histogram.total_weight(), 0.0);
    }

    #[test]
    fn test_entropy_uniform_maximal() {
        // Four equally-weighted bins: entropy = ln(4).
        let mut uniform = Histogram::new(4);
        for value in [1.0, 2.0, 3.0, 4.0] {
            uniform.insert(value);
        }
        assert!((uniform.entropy() - 4.0_f64.ln()).abs() < 1e-9);

        // A lopsided distribution carries less entropy.
        let mut skewed = Histogram::new(4);
        for _ in 0..97 {
            skewed.insert(1.0);
        }
        for value in [2.0, 3.0, 4.0] {
            skewed.insert(value);
        }
        assert!(skewed.entropy() < uniform.entropy());
    }

    #[test]
    fn test_decay_drops_stale_bins() {
        let mut histogram = Histogram::new(8);
        histogram.insert(1.0);
        histogram.insert(2.0);

        histogram.decay(0.5);
        assert!((histogram.total_weight() - 1.0).abs() < 1e-9);

        // Decay to oblivion removes the bins entirely.
        for _ in 0..64 {
            histogram.decay(0.25);
        }
        assert!(histogram.bins().is_empty());
    }
}
