//! Column-wise drift evaluation over Arrow record batches.
//!
//! [`evaluate`] scores every shared column of an initial and a new sample with
//! the population stability index. [`DriftEvaluator`] wraps the same
//! computation behind a validated [`DriftConfig`].

use std::collections::BTreeSet;

use arrow::array::{Array, ArrayRef, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use dt_types::{DriftError, DtResult, SampleSide};

use crate::psi::{population_stability_index, validate_parameters};
use crate::report::{DriftReport, DriftThresholds, ScoreMap};

/// Configuration for a [`DriftEvaluator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftConfig {
    /// Number of equal-width bins over the initial sample's range.
    pub bin_counts: usize,
    /// Stand-in proportion for empty bins.
    pub epsilon: f64,
    /// Severity cut-offs used by [`DriftEvaluator::report`].
    #[serde(default)]
    pub thresholds: DriftThresholds,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            bin_counts: 10,
            epsilon: 1e-4,
            thresholds: DriftThresholds::default(),
        }
    }
}

impl DriftConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bin_counts(mut self, bin_counts: usize) -> Self {
        self.bin_counts = bin_counts;
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_thresholds(mut self, thresholds: DriftThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn validate(&self) -> Result<(), DriftError> {
        validate_parameters(self.bin_counts, self.epsilon)?;
        self.thresholds.validate()
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> DtResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

/// Score every shared column of `initial` against `new`.
///
/// Both batches must carry the same set of column names; order may differ.
/// Results follow the initial batch's column order. Null slots are ignored.
pub fn evaluate(
    initial: &RecordBatch,
    new: &RecordBatch,
    bin_counts: usize,
    epsilon: f64,
) -> DtResult<ScoreMap> {
    validate_parameters(bin_counts, epsilon)?;
    check_schema(initial, new)?;

    let schema = initial.schema();
    let scores = (0..initial.num_columns())
        .into_par_iter()
        .map(|idx| -> DtResult<(String, f64)> {
            let name = schema.field(idx).name();
            let new_column = new
                .column_by_name(name)
                .ok_or_else(|| schema_mismatch(initial, new))?;

            let initial_values = column_values(initial.column(idx), name, SampleSide::Initial)?;
            let new_values = column_values(new_column, name, SampleSide::New)?;

            let score =
                population_stability_index(&initial_values, &new_values, bin_counts, epsilon)
                    .map_err(|e| e.in_column(name))?;

            debug!("PSI for {}: {:.6}", name, score);
            Ok((name.to_string(), score))
        })
        .collect::<DtResult<Vec<_>>>()?;

    // Names were checked for duplicates above.
    let scores = ScoreMap::from_unique(scores);
    info!(
        "Evaluated drift for {} columns ({} vs {} rows, {} bins)",
        scores.len(),
        initial.num_rows(),
        new.num_rows(),
        bin_counts
    );

    Ok(scores)
}

/// Drift scoring with a fixed, validated configuration.
#[derive(Debug, Clone, Default)]
pub struct DriftEvaluator {
    config: DriftConfig,
}

impl DriftEvaluator {
    pub fn new(config: DriftConfig) -> Result<Self, DriftError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    pub fn evaluate(&self, initial: &RecordBatch, new: &RecordBatch) -> DtResult<ScoreMap> {
        evaluate(initial, new, self.config.bin_counts, self.config.epsilon)
    }

    /// Evaluate and classify each feature against the configured thresholds.
    pub fn report(&self, initial: &RecordBatch, new: &RecordBatch) -> DtResult<DriftReport> {
        let scores = self.evaluate(initial, new)?;
        Ok(DriftReport::from_scores(
            &scores,
            self.config.bin_counts,
            self.config.epsilon,
            &self.config.thresholds,
        ))
    }
}

fn column_names(batch: &RecordBatch) -> Vec<String> {
    batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().to_string())
        .collect()
}

fn schema_mismatch(initial: &RecordBatch, new: &RecordBatch) -> DriftError {
    DriftError::SchemaMismatch {
        initial: column_names(initial),
        new: column_names(new),
    }
}

fn check_schema(initial: &RecordBatch, new: &RecordBatch) -> Result<(), DriftError> {
    let initial_names = column_names(initial);
    let new_names = column_names(new);

    let initial_set: BTreeSet<&str> = initial_names.iter().map(String::as_str).collect();
    let new_set: BTreeSet<&str> = new_names.iter().map(String::as_str).collect();

    // Duplicate names would make the set comparison ambiguous.
    let unique = initial_set.len() == initial_names.len() && new_set.len() == new_names.len();
    if !unique || initial_set != new_set {
        return Err(DriftError::SchemaMismatch {
            initial: initial_names,
            new: new_names,
        });
    }
    Ok(())
}

/// Copy the non-null values of a numeric column out as `f64`.
fn column_values(array: &ArrayRef, column: &str, side: SampleSide) -> DtResult<Vec<f64>> {
    let data_type = array.data_type();
    if !data_type.is_numeric() {
        return Err(DriftError::InvalidColumnType {
            column: column.to_string(),
            data_type: data_type.to_string(),
        }
        .into());
    }

    let floats = cast(array, &DataType::Float64)?;
    let floats = floats
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| DriftError::InvalidColumnType {
            column: column.to_string(),
            data_type: data_type.to_string(),
        })?;

    let mut values = Vec::with_capacity(floats.len() - floats.null_count());
    for (row, value) in floats.iter().enumerate() {
        let Some(value) = value else { continue };
        if !value.is_finite() {
            return Err(DriftError::NonFiniteValue {
                column: column.to_string(),
                side,
                row,
            }
            .into());
        }
        values.push(value);
    }

    if values.is_empty() {
        return Err(DriftError::EmptySample {
            column: column.to_string(),
            side,
        }
        .into());
    }

    Ok(values)
}
