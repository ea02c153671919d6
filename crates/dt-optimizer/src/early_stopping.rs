//! Patience-based early stopping.
//!
//! [`EarlyStopping`] watches a study's best value after every completed trial
//! and returns [`ControlFlow::Break`] once `patience` consecutive completions
//! have gone by without a strict improvement. The break is a cooperative stop
//! request for the engine's run loop, not an error.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use tracing::debug;

use dt_types::SearchError;

use crate::trial::{ObjectiveDirection, Study, TrialResult};

/// Counter pair tracked across one search run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoppingState {
    pub best_score: f64,
    pub no_improvement_count: usize,
}

impl StoppingState {
    fn initial(direction: ObjectiveDirection) -> Self {
        Self {
            best_score: direction.worst(),
            no_improvement_count: 0,
        }
    }
}

/// Direction-aware patience rule.
///
/// Safe to share between threads: each [`observe`](Self::observe) updates the
/// counter pair under one lock, so concurrent completions never interleave.
#[derive(Debug)]
pub struct EarlyStopping {
    direction: ObjectiveDirection,
    patience: usize,
    state: Mutex<StoppingState>,
}

impl EarlyStopping {
    pub fn new(direction: ObjectiveDirection, patience: usize) -> Result<Self, SearchError> {
        if patience == 0 {
            return Err(SearchError::InvalidConfiguration {
                message: "patience must be at least 1".to_string(),
            });
        }
        Ok(Self {
            direction,
            patience,
            state: Mutex::new(StoppingState::initial(direction)),
        })
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    pub fn state(&self) -> StoppingState {
        *self.state.lock()
    }

    pub fn reset(&self) {
        *self.state.lock() = StoppingState::initial(self.direction);
    }

    /// True once `patience` non-improvements have been recorded.
    pub fn is_triggered(&self) -> bool {
        self.state.lock().no_improvement_count >= self.patience
    }

    /// Feed the best value observed so far.
    ///
    /// Keeps returning `Break` for every update past the limit, so late
    /// completions from in-flight trials cannot silently exceed it.
    pub fn observe(&self, best_value: f64) -> ControlFlow<()> {
        let mut state = self.state.lock();

        if self.direction.better(best_value, state.best_score) {
            state.best_score = best_value;
            state.no_improvement_count = 0;
            return ControlFlow::Continue(());
        }

        state.no_improvement_count += 1;
        if state.no_improvement_count >= self.patience {
            debug!(
                "No improvement over {} for {} trials (patience {})",
                state.best_score, state.no_improvement_count, self.patience
            );
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Completion callback for [`TrialEngine::run`](crate::TrialEngine::run).
    pub fn on_trial_complete(&self, study: &Study, _trial: &TrialResult) -> ControlFlow<()> {
        match study.best_value() {
            Some(best) => self.observe(best),
            None => ControlFlow::Continue(()),
        }
    }
}
