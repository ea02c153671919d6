//! Score maps and drift reports.
//!
//! A [`ScoreMap`] is the raw output of an evaluation; a [`DriftReport`] adds a
//! dataset-level mean and a per-feature [`DriftSeverity`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use dt_types::DriftError;

/// Column name -> PSI, in the initial sample's column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreMap {
    entries: Vec<(String, f64)>,
}

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a score. New names keep insertion order.
    pub fn insert(&mut self, name: impl Into<String>, score: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((name, score)),
        }
    }

    /// Wrap entries whose names are already known to be distinct.
    pub(crate) fn from_unique(entries: Vec<(String, f64)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, score)| *score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), *s))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Average score across all features; `None` for an empty map.
    pub fn mean(&self) -> Option<f64> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: f64 = self.entries.iter().map(|(_, s)| s).sum();
        Some(sum / self.entries.len() as f64)
    }
}

impl FromIterator<(String, f64)> for ScoreMap {
    /// Later duplicates overwrite the score but keep the first position.
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut entries: Vec<(String, f64)> = Vec::new();
        for (name, score) in iter {
            match positions.get(&name) {
                Some(&idx) => entries[idx].1 = score,
                None => {
                    positions.insert(name.clone(), entries.len());
                    entries.push((name, score));
                }
            }
        }
        Self { entries }
    }
}

/// How far a feature has drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DriftSeverity {
    /// Below the moderate threshold.
    Stable,
    /// Between the moderate and significant thresholds.
    Moderate,
    /// At or above the significant threshold.
    Significant,
}

/// PSI cut-offs for [`DriftSeverity`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriftThresholds {
    pub moderate: f64,
    pub significant: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            moderate: 0.1,
            significant: 0.25,
        }
    }
}

impl DriftThresholds {
    pub fn validate(&self) -> Result<(), DriftError> {
        let ordered = self.moderate >= 0.0 && self.moderate <= self.significant;
        if !ordered || !self.significant.is_finite() {
            return Err(DriftError::InvalidConfiguration {
                message: format!(
                    "thresholds must satisfy 0 <= moderate <= significant, got {} / {}",
                    self.moderate, self.significant
                ),
            });
        }
        Ok(())
    }

    pub fn classify(&self, score: f64) -> DriftSeverity {
        if score >= self.significant {
            DriftSeverity::Significant
        } else if score >= self.moderate {
            DriftSeverity::Moderate
        } else {
            DriftSeverity::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub name: String,
    pub score: f64,
    pub severity: DriftSeverity,
}

/// A point-in-time drift assessment of one sample pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub bin_counts: usize,
    pub epsilon: f64,
    /// Mean PSI over all features (`None` when there are no columns).
    pub mean_score: Option<f64>,
    pub features: Vec<FeatureDrift>,
}

impl DriftReport {
    pub fn from_scores(
        scores: &ScoreMap,
        bin_counts: usize,
        epsilon: f64,
        thresholds: &DriftThresholds,
    ) -> Self {
        let features: Vec<FeatureDrift> = scores
            .iter()
            .map(|(name, score)| FeatureDrift {
                name: name.to_string(),
                score,
                severity: thresholds.classify(score),
            })
            .collect();

        for feature in &features {
            if feature.severity == DriftSeverity::Significant {
                warn!(
                    "Significant drift in {}: PSI {:.4} >= {:.4}",
                    feature.name, feature.score, thresholds.significant
                );
            }
        }

        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            bin_counts,
            epsilon,
            mean_score: scores.mean(),
            features,
        }
    }

    /// Features at or above [`DriftSeverity::Moderate`].
    pub fn drifted(&self) -> Vec<&FeatureDrift> {
        self.features
            .iter()
            .filter(|f| f.severity >= DriftSeverity::Moderate)
            .collect()
    }

    pub fn max_severity(&self) -> Option<DriftSeverity> {
        self.features.iter().map(|f| f.severity).max()
    }
}
