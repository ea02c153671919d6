//! # dt-drift
//!
//! Per-feature distribution drift scoring for DriftTune.
//!
//! Provides:
//! - Reference-sample bin edges and smoothed histogram proportions
//! - The population stability index (PSI) divergence
//! - Column-wise evaluation over Arrow record batches
//! - Drift reports with severity classification

pub mod binning;
pub mod evaluator;
pub mod psi;
pub mod report;

pub use binning::{BinEdges, Histogram};
pub use evaluator::{evaluate, DriftConfig, DriftEvaluator};
pub use psi::{divergence, population_stability_index};
pub use report::{DriftReport, DriftSeverity, DriftThresholds, FeatureDrift, ScoreMap};
