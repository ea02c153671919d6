//! # dt-optimizer
//!
//! Bounded hyperparameter search for DriftTune.
//!
//! Provides search space definitions, parameter samplers (grid, random), trial
//! and study tracking, a trial engine with optional worker threads, and a
//! runner that stops a search once the best value stops improving.

mod early_stopping;
mod engine;
mod runner;
mod search;
mod trial;

pub use early_stopping::{EarlyStopping, StoppingState};
pub use engine::{StudyEngine, TrialEngine};
pub use runner::{BoundedSearchRunner, SearchConfig};
pub use search::{
    GridSampler, ParamMap, ParameterDef, ParameterKind, ParameterValue, RandomSampler, Sampler,
    SearchSpace,
};
pub use trial::{ObjectiveDirection, Study, StudyState, Termination, Trial, TrialResult};
