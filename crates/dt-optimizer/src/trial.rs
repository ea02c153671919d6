//! Trial tracking and study (search session) management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use dt_types::SearchError;

use crate::search::{ParamMap, ParameterValue};

/// Unique study identifier.
pub type StudyId = Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveDirection {
    #[default]
    Maximize,
    Minimize,
}

impl ObjectiveDirection {
    /// True when `candidate` strictly improves on `incumbent`.
    pub fn better(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    /// The starting incumbent: every finite value improves on it.
    pub fn worst(self) -> f64 {
        match self {
            Self::Maximize => f64::NEG_INFINITY,
            Self::Minimize => f64::INFINITY,
        }
    }
}

/// Lifecycle state for a study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Why a completed study stopped proposing trials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The trial budget (or the sampler) ran out.
    ExhaustedBudget,
    /// The completion callback asked the engine to stop.
    EarlyStopped,
}

/// One search session: every completed trial plus the best so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Study {
    pub id: StudyId,
    pub name: String,
    pub direction: ObjectiveDirection,
    pub state: StudyState,
    pub trials: Vec<TrialResult>,
    pub best_trial: Option<TrialResult>,
    pub termination: Option<Termination>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Study {
    pub fn new(name: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            direction,
            state: StudyState::Pending,
            trials: Vec::new(),
            best_trial: None,
            termination: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = StudyState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, termination: Termination) {
        self.state = StudyState::Completed;
        self.termination = Some(termination);
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = StudyState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Append a completed trial, replacing the best trial if it improves on it.
    pub fn record(&mut self, result: TrialResult) {
        let improves = match &self.best_trial {
            None => true,
            Some(best) => self.direction.better(result.value, best.value),
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
        self.trials.push(result);
    }

    pub fn best_value(&self) -> Option<f64> {
        self.best_trial.as_ref().map(|t| t.value)
    }

    pub fn best_trial(&self) -> Option<&TrialResult> {
        self.best_trial.as_ref()
    }

    pub fn n_trials(&self) -> usize {
        self.trials.len()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single proposed parameter configuration handed to the objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub study_id: StudyId,
    /// 0-based position in the study's proposal sequence.
    pub number: usize,
    pub params: ParamMap,
    pub created_at: DateTime<Utc>,
}

impl Trial {
    pub fn new(study_id: StudyId, number: usize, params: ParamMap) -> Self {
        Self {
            id: Uuid::new_v4(),
            study_id,
            number,
            params,
            created_at: Utc::now(),
        }
    }

    pub fn param(&self, name: &str) -> Option<&ParameterValue> {
        self.params.get(name)
    }

    /// Float parameter; integer parameters are widened.
    pub fn float(&self, name: &str) -> Result<f64, SearchError> {
        match self.require(name)? {
            ParameterValue::Float(v) => Ok(*v),
            ParameterValue::Int(v) => Ok(*v as f64),
            ParameterValue::Json(_) => Err(Self::type_error(name, "float")),
        }
    }

    pub fn int(&self, name: &str) -> Result<i64, SearchError> {
        match self.require(name)? {
            ParameterValue::Int(v) => Ok(*v),
            _ => Err(Self::type_error(name, "integer")),
        }
    }

    pub fn choice(&self, name: &str) -> Result<&serde_json::Value, SearchError> {
        match self.require(name)? {
            ParameterValue::Json(v) => Ok(v),
            _ => Err(Self::type_error(name, "categorical choice")),
        }
    }

    /// Close out this trial with its objective value.
    pub fn complete(self, value: f64, elapsed: Duration) -> TrialResult {
        TrialResult {
            trial_id: self.id,
            number: self.number,
            value,
            params: self.params,
            started_at: self.created_at,
            finished_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    fn require(&self, name: &str) -> Result<&ParameterValue, SearchError> {
        self.params
            .get(name)
            .ok_or_else(|| SearchError::MissingParameter {
                name: name.to_string(),
            })
    }

    fn type_error(name: &str, expected: &str) -> SearchError {
        SearchError::ParameterType {
            name: name.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Record of one completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub number: usize,
    pub value: f64,
    pub params: ParamMap,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(number: usize, value: f64) -> TrialResult {
        Trial::new(Uuid::new_v4(), number, ParamMap::new()).complete(value, Duration::ZERO)
    }

    #[test]
    fn direction_comparisons_are_strict() {
        assert!(ObjectiveDirection::Maximize.better(2.0, 1.0));
        assert!(!ObjectiveDirection::Maximize.better(1.0, 1.0));
        assert!(ObjectiveDirection::Minimize.better(1.0, 2.0));
        assert!(!ObjectiveDirection::Minimize.better(2.0, 2.0));

        for direction in [ObjectiveDirection::Maximize, ObjectiveDirection::Minimize] {
            assert!(direction.better(0.0, direction.worst()));
        }
    }

    #[test]
    fn study_lifecycle() {
        let mut study = Study::new("drift_tuning", ObjectiveDirection::Minimize);
        assert_eq!(study.state, StudyState::Pending);
        assert!(study.started_at.is_none());

        study.mark_running();
        assert_eq!(study.state, StudyState::Running);
        assert!(study.started_at.is_some());

        study.mark_completed(Termination::EarlyStopped);
        assert_eq!(study.state, StudyState::Completed);
        assert_eq!(study.termination(), Some(Termination::EarlyStopped));
        assert!(study.finished_at.is_some());
    }

    #[test]
    fn study_failure() {
        let mut study = Study::new("failing", ObjectiveDirection::Maximize);
        study.mark_running();
        study.mark_failed("objective panicked".into());
        assert_eq!(study.state, StudyState::Failed);
        assert_eq!(study.error.as_deref(), Some("objective panicked"));
        assert!(study.termination().is_none());
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut study = Study::new("max", ObjectiveDirection::Maximize);
        assert_eq!(study.best_value(), None);

        study.record(result(0, 1.5));
        study.record(result(1, 2.0));
        study.record(result(2, 2.0));
        study.record(result(3, 1.0));

        assert_eq!(study.n_trials(), 4);
        assert_eq!(study.best_value(), Some(2.0));
        // Ties keep the earlier trial.
        assert_eq!(study.best_trial().unwrap().number, 1);
    }

    #[test]
    fn best_trial_tracking_minimize() {
        let mut study = Study::new("min", ObjectiveDirection::Minimize);
        study.record(result(0, 0.15));
        study.record(result(1, 0.05));
        study.record(result(2, 0.07));
        assert_eq!(study.best_value(), Some(0.05));
        assert_eq!(study.best_trial().unwrap().number, 1);
    }

    #[test]
    fn trial_parameter_accessors() {
        let mut params = ParamMap::new();
        params.insert("bins".into(), ParameterValue::Int(10));
        params.insert("eps".into(), ParameterValue::Float(1e-4));
        params.insert("mode".into(), ParameterValue::Json(serde_json::json!("reference")));
        let trial = Trial::new(Uuid::new_v4(), 0, params);

        assert_eq!(trial.int("bins"), Ok(10));
        assert_eq!(trial.float("bins"), Ok(10.0));
        assert_eq!(trial.float("eps"), Ok(1e-4));
        assert_eq!(trial.choice("mode").unwrap(), "reference");

        assert_eq!(
            trial.int("eps"),
            Err(SearchError::ParameterType {
                name: "eps".into(),
                expected: "integer".into(),
            })
        );
        assert_eq!(
            trial.float("missing"),
            Err(SearchError::MissingParameter {
                name: "missing".into()
            })
        );
    }

    #[test]
    fn completed_trial_keeps_identity() {
        let trial = Trial::new(Uuid::new_v4(), 4, ParamMap::new());
        let id = trial.id;
        let result = trial.complete(0.3, Duration::from_millis(25));
        assert_eq!(result.trial_id, id);
        assert_eq!(result.number, 4);
        assert_eq!(result.duration_ms, 25);
        assert!(result.finished_at >= result.started_at);
    }
}
