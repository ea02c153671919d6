//! Population stability index (PSI) over one pair of value slices.

use dt_types::{DriftError, SampleSide};

use crate::binning::BinEdges;

/// Symmetrised KL-style divergence between two proportion vectors:
/// `sum((p - q) * (ln p - ln q))`.
///
/// Both slices must be strictly positive and of equal length; smoothing with
/// [`Histogram::proportions`](crate::Histogram::proportions) guarantees this.
pub fn divergence(initial: &[f64], new: &[f64]) -> f64 {
    debug_assert_eq!(initial.len(), new.len());
    initial
        .iter()
        .zip(new)
        .map(|(&p, &q)| (p - q) * (p.ln() - q.ln()))
        .sum()
}

/// PSI of `new` against `initial`, binned on the initial sample's range.
pub fn population_stability_index(
    initial: &[f64],
    new: &[f64],
    bin_counts: usize,
    epsilon: f64,
) -> Result<f64, DriftError> {
    validate_parameters(bin_counts, epsilon)?;
    check_sample(initial, SampleSide::Initial)?;
    check_sample(new, SampleSide::New)?;

    let edges =
        BinEdges::from_reference(initial, bin_counts).ok_or(DriftError::EmptySample {
            column: String::new(),
            side: SampleSide::Initial,
        })?;

    let initial_props = edges.histogram(initial).proportions(epsilon);
    let new_props = edges.histogram(new).proportions(epsilon);

    Ok(divergence(&initial_props, &new_props))
}

pub(crate) fn validate_parameters(bin_counts: usize, epsilon: f64) -> Result<(), DriftError> {
    if bin_counts == 0 {
        return Err(DriftError::InvalidConfiguration {
            message: "bin_counts must be at least 1".to_string(),
        });
    }
    if !(epsilon > 0.0 && epsilon < 1.0) {
        return Err(DriftError::InvalidConfiguration {
            message: format!("epsilon must lie in (0, 1), got {epsilon}"),
        });
    }
    Ok(())
}

fn check_sample(values: &[f64], side: SampleSide) -> Result<(), DriftError> {
    if values.is_empty() {
        return Err(DriftError::EmptySample {
            column: String::new(),
            side,
        });
    }
    if let Some(row) = values.iter().position(|v| !v.is_finite()) {
        return Err(DriftError::NonFiniteValue {
            column: String::new(),
            side,
            row,
        });
    }
    Ok(())
}
