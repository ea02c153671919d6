//! Reference-sample bin edges and histogram proportions.
//!
//! Edges are always derived from the initial (reference) sample and then
//! applied unchanged to both samples, so the two histograms share one binning.

use serde::{Deserialize, Serialize};

/// Half-width used to open up a zero-width range (constant column).
const DEGENERATE_HALF_WIDTH: f64 = 0.5;

/// `bin_counts + 1` strictly increasing, equally spaced boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinEdges {
    edges: Vec<f64>,
}

impl BinEdges {
    /// Equally spaced edges over `[min, max]` of `values`.
    ///
    /// Returns `None` when `values` is empty or `bin_counts` is zero. A
    /// constant sample gets the range `[v - 0.5, v + 0.5]`.
    pub fn from_reference(values: &[f64], bin_counts: usize) -> Option<Self> {
        if values.is_empty() || bin_counts == 0 {
            return None;
        }

        let (min, max) = values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });

        Some(Self::linear(min, max, bin_counts))
    }

    fn linear(min: f64, max: f64, bin_counts: usize) -> Self {
        let (lo, hi) = if max > min {
            (min, max)
        } else {
            // Widen by at least one ulp-scale step so huge constants still open up.
            let half = DEGENERATE_HALF_WIDTH.max(min.abs() * f64::EPSILON);
            (min - half, (max + half).min(f64::MAX))
        };

        // Interpolate rather than step by `hi - lo`, which overflows for
        // ranges wider than f64::MAX.
        let n = bin_counts as f64;
        let edges = (0..=bin_counts)
            .map(|i| {
                let t = i as f64 / n;
                lo * (1.0 - t) + hi * t
            })
            .collect();

        Self { edges }
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn bin_count(&self) -> usize {
        self.edges.len() - 1
    }

    /// Index of the bin holding `value`.
    ///
    /// Bins are half-open `[edge[i], edge[i + 1])` except the last, which also
    /// holds the final edge. Values outside the edges are clamped into the
    /// first or last bin.
    pub fn bin_index(&self, value: f64) -> usize {
        let n = self.bin_count();
        if value <= self.edges[0] {
            return 0;
        }
        if value >= self.edges[n] {
            return n - 1;
        }

        // Number of edges at or below `value`; at least one here.
        let above = self.edges.partition_point(|&edge| edge <= value);
        (above - 1).min(n - 1)
    }

    /// Count `values` into these bins. Does not reorder or copy the input.
    pub fn histogram(&self, values: &[f64]) -> Histogram {
        let mut counts = vec![0u64; self.bin_count()];
        for &value in values {
            counts[self.bin_index(value)] += 1;
        }
        Histogram {
            counts,
            total: values.len() as u64,
        }
    }
}

/// Raw per-bin counts for one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Histogram {
    counts: Vec<u64>,
    total: u64,
}

impl Histogram {
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Per-bin share of the sample, with empty bins replaced by `epsilon`.
    pub fn proportions(&self, epsilon: f64) -> Vec<f64> {
        let total = self.total as f64;
        self.counts
            .iter()
            .map(|&count| {
                if count == 0 {
                    epsilon
                } else {
                    count as f64 / total
                }
            })
            .collect()
    }
}
