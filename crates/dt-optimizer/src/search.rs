//! Search space definitions and parameter samplers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use dt_types::SearchError;

/// Values picked for one trial, keyed by parameter name.
pub type ParamMap = HashMap<String, ParameterValue>;

/// One named axis of a search space, e.g. `bin_counts` or `epsilon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    pub name: String,
    pub kind: ParameterKind,
}

/// Range a parameter is drawn from. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    FloatRange { low: f64, high: f64 },
    IntRange { low: i64, high: i64 },
    /// Uniform in `ln` space; `low` must be positive.
    LogUniform { low: f64, high: f64 },
    Choice { values: Vec<serde_json::Value> },
}

/// A sampled value as seen by the objective through [`Trial`](crate::Trial).
///
/// Serialized untagged, so a trial's parameters read as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Ordered set of axes a sampler draws from. Built with the `add_*` chain:
///
/// ```
/// use dt_optimizer::SearchSpace;
///
/// let space = SearchSpace::new()
///     .add_int("bin_counts", 2, 50)
///     .add_log_uniform("epsilon", 1e-6, 1e-2);
/// assert!(space.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::FloatRange { low, high })
    }

    pub fn add_int(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.push(name, ParameterKind::IntRange { low, high })
    }

    pub fn add_log_uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.push(name, ParameterKind::LogUniform { low, high })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.push(name, ParameterKind::Choice { values })
    }

    fn push(mut self, name: impl Into<String>, kind: ParameterKind) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind,
        });
        self
    }

    /// Points in the full grid. `None` for continuous axes, invalid ranges,
    /// or a count that does not fit in `usize`.
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => {
                    let span = high.checked_sub(*low)?.checked_add(1)?;
                    usize::try_from(span).ok()?
                }
                ParameterKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// Check every range is non-empty and sampleable.
    pub fn validate(&self) -> Result<(), SearchError> {
        for param in &self.parameters {
            let valid = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    low.is_finite() && high.is_finite() && low <= high
                }
                ParameterKind::IntRange { low, high } => low <= high,
                ParameterKind::LogUniform { low, high } => {
                    *low > 0.0 && high.is_finite() && low <= high
                }
                ParameterKind::Choice { values } => !values.is_empty(),
            };
            if !valid {
                return Err(SearchError::InvalidConfiguration {
                    message: format!("parameter {} has an empty or invalid range", param.name),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Samplers
// ---------------------------------------------------------------------------

/// Proposes parameter configurations for successive trials.
pub trait Sampler: Send {
    /// Parameters for trial `trial_number`, or `None` once the sampler has
    /// nothing left to propose.
    fn suggest(&mut self, trial_number: usize) -> Option<ParamMap>;

    /// Report a completed trial so adaptive samplers can learn.
    fn report(&mut self, _params: &ParamMap, _value: f64) {}

    /// Human-readable sampler name.
    fn name(&self) -> &str;
}

// ---- Grid ----

/// Exhaustive grid over the cartesian product of all dimensions.
#[derive(Debug, Clone)]
pub struct GridSampler {
    combos: Vec<ParamMap>,
    cursor: usize,
}

impl GridSampler {
    /// `float_steps` sets how many points continuous dimensions get.
    pub fn new(space: &SearchSpace, float_steps: usize) -> Self {
        Self {
            combos: Self::build_grid(space, float_steps),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn axis(kind: &ParameterKind, float_steps: usize) -> Vec<ParameterValue> {
        let steps = float_steps.max(2);
        let spaced = |low: f64, high: f64| -> Vec<f64> {
            (0..steps)
                .map(|i| low + (i as f64 / (steps - 1) as f64) * (high - low))
                .collect()
        };

        match kind {
            ParameterKind::FloatRange { low, high } => spaced(*low, *high)
                .into_iter()
                .map(ParameterValue::Float)
                .collect(),
            ParameterKind::IntRange { low, high } => {
                (*low..=*high).map(ParameterValue::Int).collect()
            }
            ParameterKind::LogUniform { low, high } => spaced(low.ln(), high.ln())
                .into_iter()
                .map(|v| ParameterValue::Float(v.exp()))
                .collect(),
            ParameterKind::Choice { values } => {
                values.iter().cloned().map(ParameterValue::Json).collect()
            }
        }
    }

    fn build_grid(space: &SearchSpace, float_steps: usize) -> Vec<ParamMap> {
        let mut grid: Vec<ParamMap> = vec![ParamMap::new()];
        for param in &space.parameters {
            let axis = Self::axis(&param.kind, float_steps);
            grid = grid
                .iter()
                .flat_map(|existing| {
                    axis.iter().map(move |value| {
                        let mut combo = existing.clone();
                        combo.insert(param.name.clone(), value.clone());
                        combo
                    })
                })
                .collect();
        }
        grid
    }
}

impl Sampler for GridSampler {
    fn suggest(&mut self, _trial_number: usize) -> Option<ParamMap> {
        let combo = self.combos.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(combo)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random ----

/// Independent uniform sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSampler {
    space: SearchSpace,
    rng: StdRng,
}

impl RandomSampler {
    /// OS-seeded sampler over a validated `space`.
    pub fn new(space: SearchSpace) -> Result<Self, SearchError> {
        space.validate()?;
        Ok(Self::with_rng(space, StdRng::from_os_rng()))
    }

    /// Reproducible sampler over a validated `space`.
    pub fn seeded(space: SearchSpace, seed: u64) -> Result<Self, SearchError> {
        space.validate()?;
        Ok(Self::with_rng(space, StdRng::seed_from_u64(seed)))
    }

    pub(crate) fn with_rng(space: SearchSpace, rng: StdRng) -> Self {
        Self { space, rng }
    }

    fn sample_one(&mut self) -> ParamMap {
        let mut params = ParamMap::new();

        for param in &self.space.parameters {
            let value = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    ParameterValue::Float(self.rng.random_range(*low..=*high))
                }
                ParameterKind::IntRange { low, high } => {
                    ParameterValue::Int(self.rng.random_range(*low..=*high))
                }
                ParameterKind::LogUniform { low, high } => {
                    let log_val: f64 = self.rng.random_range(low.ln()..=high.ln());
                    ParameterValue::Float(log_val.exp().clamp(*low, *high))
                }
                ParameterKind::Choice { values } => {
                    let idx = self.rng.random_range(0..values.len());
                    ParameterValue::Json(values[idx].clone())
                }
            };
            params.insert(param.name.clone(), value);
        }

        params
    }
}

impl Sampler for RandomSampler {
    fn suggest(&mut self, _trial_number: usize) -> Option<ParamMap> {
        Some(self.sample_one())
    }

    fn name(&self) -> &str {
        "random"
    }
}
