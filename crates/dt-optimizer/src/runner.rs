//! Bounded search: run an objective through a [`TrialEngine`] until the trial
//! budget runs out or the best value stops improving.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dt_types::{DtResult, SearchError};

use crate::early_stopping::EarlyStopping;
use crate::engine::{StudyEngine, TrialEngine};
use crate::search::SearchSpace;
use crate::trial::{ObjectiveDirection, Study, Termination, Trial, TrialResult};

/// Budget and execution settings for a bounded search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Maximum number of trials to run.
    pub max_trials: usize,
    /// Consecutive non-improving trials tolerated before stopping.
    pub patience: usize,
    /// How many trials to evaluate in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Seed for the random sampler; `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_concurrency() -> usize {
    1
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_trials: 100,
            patience: 10,
            concurrency: default_concurrency(),
            seed: None,
        }
    }
}

impl SearchConfig {
    pub fn new(max_trials: usize, patience: usize) -> Self {
        Self {
            max_trials,
            patience,
            ..Self::default()
        }
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        validate_budget(self.max_trials, self.patience)?;
        if self.concurrency == 0 {
            return Err(SearchError::InvalidConfiguration {
                message: "concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> DtResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_budget(max_trials: usize, patience: usize) -> Result<(), SearchError> {
    if max_trials == 0 {
        return Err(SearchError::InvalidConfiguration {
            message: "max_trials must be at least 1".to_string(),
        });
    }
    if patience == 0 {
        return Err(SearchError::InvalidConfiguration {
            message: "patience must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Runs an objective through a trial engine with patience-based early stopping.
///
/// Early stopping and an exhausted budget are both successful completions:
/// either way the best trial seen is returned. Errors from the objective are
/// passed through untouched.
pub struct BoundedSearchRunner<F, G = StudyEngine> {
    objective: F,
    name: String,
    direction: ObjectiveDirection,
    engine: G,
}

impl<F> BoundedSearchRunner<F> {
    /// Runner over the default engine (random sampling, empty space).
    pub fn new(objective: F, name: impl Into<String>, direction: ObjectiveDirection) -> Self {
        Self {
            objective,
            name: name.into(),
            direction,
            engine: StudyEngine::default(),
        }
    }

    /// Runner over a random-sampling engine for `space`, with concurrency and
    /// seed taken from `config`.
    pub fn from_config(
        objective: F,
        name: impl Into<String>,
        direction: ObjectiveDirection,
        space: SearchSpace,
        config: &SearchConfig,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            objective,
            name: name.into(),
            direction,
            engine: StudyEngine::from_config(space, config)?,
        })
    }
}

impl<F, G: TrialEngine> BoundedSearchRunner<F, G> {
    pub fn with_engine<H: TrialEngine>(self, engine: H) -> BoundedSearchRunner<F, H> {
        BoundedSearchRunner {
            objective: self.objective,
            name: self.name,
            direction: self.direction,
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> ObjectiveDirection {
        self.direction
    }

    pub fn engine(&self) -> &G {
        &self.engine
    }

    /// Best trial of a search of at most `max_trials` trials that stops after
    /// `patience` consecutive non-improving trials.
    pub fn optimize<E>(&self, max_trials: usize, patience: usize) -> Result<TrialResult, E>
    where
        F: Fn(&Trial) -> Result<f64, E> + Sync,
        E: From<SearchError> + Send,
    {
        let study = self.run_study(max_trials, patience)?;
        study.best_trial.ok_or_else(|| {
            SearchError::NoCompletedTrials {
                study: self.name.clone(),
            }
            .into()
        })
    }

    /// [`optimize`](Self::optimize) with the budget taken from a validated
    /// `config`.
    ///
    /// Concurrency and seed belong to the engine and are fixed when it is
    /// built (see [`BoundedSearchRunner::from_config`]); here they are only
    /// checked, and a concurrency that differs from the engine's is logged.
    pub fn optimize_with<E>(&self, config: &SearchConfig) -> Result<TrialResult, E>
    where
        F: Fn(&Trial) -> Result<f64, E> + Sync,
        E: From<SearchError> + Send,
    {
        config.validate()?;
        if config.concurrency != self.engine.concurrency() {
            warn!(
                "Config asks for concurrency {} but the engine runs {}; keeping the engine's",
                config.concurrency,
                self.engine.concurrency()
            );
        }
        self.optimize(config.max_trials, config.patience)
    }

    /// Like [`optimize`](Self::optimize) but hands back the whole study.
    pub fn run_study<E>(&self, max_trials: usize, patience: usize) -> Result<Study, E>
    where
        F: Fn(&Trial) -> Result<f64, E> + Sync,
        E: From<SearchError> + Send,
    {
        validate_budget(max_trials, patience)?;
        if patience >= max_trials {
            debug!(
                "patience {} >= max_trials {}: early stopping cannot trigger",
                patience, max_trials
            );
        }

        let policy = EarlyStopping::new(self.direction, patience)?;
        let mut study = self.engine.create_run(self.direction, &self.name);

        let best = self.engine.run(&mut study, &self.objective, max_trials, |study, trial| {
            policy.on_trial_complete(study, trial)
        })?;

        match study.termination() {
            Some(Termination::EarlyStopped) => info!(
                "Study {} stopped early after {} trials: no improvement for {} trials, best {} (trial {})",
                study.name,
                study.n_trials(),
                patience,
                best.value,
                best.number
            ),
            _ => info!(
                "Study {} used its budget of {} trials ({} completed), best {} (trial {})",
                study.name,
                max_trials,
                study.n_trials(),
                best.value,
                best.number
            ),
        }

        Ok(study)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{GridSampler, ParameterValue, RandomSampler, SearchSpace};
    use crate::trial::StudyState;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Objective replaying `values[trial.number]`, counting invocations.
    fn replay<'a>(
        values: &'a [f64],
        calls: &'a AtomicUsize,
    ) -> impl Fn(&Trial) -> Result<f64, SearchError> + Sync + 'a {
        move |trial: &Trial| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(values[trial.number])
        }
    }

    #[derive(Debug, PartialEq)]
    enum ObjectiveError {
        Search(SearchError),
        Diverged(usize),
    }

    impl From<SearchError> for ObjectiveError {
        fn from(e: SearchError) -> Self {
            Self::Search(e)
        }
    }

    #[test]
    fn plateau_stops_after_patience() {
        let values = [1.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 2.0];
        let calls = AtomicUsize::new(0);
        let runner = BoundedSearchRunner::new(
            replay(&values, &calls),
            "plateau",
            ObjectiveDirection::Maximize,
        );

        let study = runner.run_study::<SearchError>(10, 3).unwrap();
        // Best 2 at trial #1, then #2..#4 do not improve.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(study.termination(), Some(Termination::EarlyStopped));
        assert_eq!(study.best_value(), Some(2.0));
        assert_eq!(study.best_trial().unwrap().number, 1);
        assert_eq!(study.trials.last().unwrap().number, 4);
    }

    #[test]
    fn optimize_returns_best_trial() {
        let values = [1.0, 2.0, 2.0, 2.0, 2.0];
        let calls = AtomicUsize::new(0);
        let runner =
            BoundedSearchRunner::new(replay(&values, &calls), "best", ObjectiveDirection::Maximize);

        let best: TrialResult = runner.optimize::<SearchError>(5, 3).unwrap();
        assert_eq!(best.value, 2.0);
        assert_eq!(best.number, 1);
    }

    #[test]
    fn patience_at_least_budget_uses_every_trial() {
        let values = [5.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        for patience in [6, 7, 100] {
            let calls = AtomicUsize::new(0);
            let runner = BoundedSearchRunner::new(
                replay(&values, &calls),
                "full_budget",
                ObjectiveDirection::Maximize,
            );
            let study = runner.run_study::<SearchError>(6, patience).unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 6);
            assert_eq!(study.termination(), Some(Termination::ExhaustedBudget));
            assert_eq!(study.best_value(), Some(5.0));
        }
    }

    #[test]
    fn minimize_decreasing_never_stops_early() {
        let values: Vec<f64> = (0..30).map(|i| 10.0 - i as f64 * 0.25).collect();
        let calls = AtomicUsize::new(0);
        let runner = BoundedSearchRunner::new(
            replay(&values, &calls),
            "descent",
            ObjectiveDirection::Minimize,
        );

        let study = runner.run_study::<SearchError>(30, 1).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 30);
        assert_eq!(study.termination(), Some(Termination::ExhaustedBudget));
        assert_eq!(study.best_trial().unwrap().number, 29);
    }

    #[test]
    fn invalid_budget_rejected_before_any_trial() {
        let values = [1.0];
        let calls = AtomicUsize::new(0);
        let runner =
            BoundedSearchRunner::new(replay(&values, &calls), "bad", ObjectiveDirection::Maximize);

        assert!(matches!(
            runner.optimize::<SearchError>(0, 1),
            Err(SearchError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            runner.optimize::<SearchError>(1, 0),
            Err(SearchError::InvalidConfiguration { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn objective_errors_pass_through() {
        let calls = AtomicUsize::new(0);
        let objective = |trial: &Trial| -> Result<f64, ObjectiveError> {
            calls.fetch_add(1, Ordering::SeqCst);
            if trial.number == 2 {
                return Err(ObjectiveError::Diverged(trial.number));
            }
            Ok(trial.number as f64)
        };
        let runner = BoundedSearchRunner::new(objective, "fails", ObjectiveDirection::Maximize);

        assert_eq!(runner.optimize(10, 3), Err(ObjectiveError::Diverged(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn nan_objective_is_an_error() {
        let runner = BoundedSearchRunner::new(
            |_: &Trial| -> Result<f64, SearchError> { Ok(f64::NAN) },
            "nan",
            ObjectiveDirection::Minimize,
        );
        assert_eq!(
            runner.optimize(5, 2),
            Err(SearchError::NanObjective { trial_number: 0 })
        );
    }

    #[test]
    fn grid_exhaustion_counts_as_budget() {
        let space = SearchSpace::new().add_int("bins", 1, 3);
        let runner = BoundedSearchRunner::new(
            |trial: &Trial| -> Result<f64, SearchError> { Ok(trial.int("bins")? as f64) },
            "grid",
            ObjectiveDirection::Maximize,
        )
        .with_engine(StudyEngine::new(GridSampler::new(&space, 2)));

        let study = runner.run_study::<SearchError>(10, 10).unwrap();
        assert_eq!(study.n_trials(), 3);
        assert_eq!(study.termination(), Some(Termination::ExhaustedBudget));
        assert_eq!(
            study.best_trial().unwrap().params.get("bins"),
            Some(&ParameterValue::Int(3))
        );
    }

    #[test]
    fn random_search_finds_quadratic_minimum() {
        let space = SearchSpace::new().add_float("x", -10.0, 10.0);
        let runner = BoundedSearchRunner::new(
            |trial: &Trial| -> Result<f64, SearchError> {
                let x = trial.float("x")?;
                Ok((x - 3.0).powi(2))
            },
            "quadratic",
            ObjectiveDirection::Minimize,
        )
        .with_engine(StudyEngine::new(RandomSampler::seeded(space, 42).unwrap()));

        let best = runner.optimize::<SearchError>(200, 200).unwrap();
        assert!(best.value < 1.0, "best value {} too far from 0", best.value);
    }

    #[test]
    fn parallel_run_uses_full_budget() {
        let calls = AtomicUsize::new(0);
        let objective = |trial: &Trial| -> Result<f64, SearchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(trial.number as f64)
        };
        let runner = BoundedSearchRunner::new(objective, "parallel", ObjectiveDirection::Maximize)
            .with_engine(StudyEngine::default().with_concurrency(4));

        let study = runner.run_study::<SearchError>(40, 40).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 40);
        assert_eq!(study.n_trials(), 40);
        assert_eq!(study.best_value(), Some(39.0));
        assert_eq!(study.state, StudyState::Completed);

        let mut numbers: Vec<usize> = study.trials.iter().map(|t| t.number).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_run_stops_early() {
        let calls = AtomicUsize::new(0);
        let objective = |_: &Trial| -> Result<f64, SearchError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1.0)
        };
        let runner = BoundedSearchRunner::new(objective, "flat", ObjectiveDirection::Minimize)
            .with_engine(StudyEngine::default().with_concurrency(4));

        let study = runner.run_study::<SearchError>(100, 5).unwrap();
        assert_eq!(study.termination(), Some(Termination::EarlyStopped));
        // One improving trial, five stale ones, plus at most three in flight.
        assert!(study.n_trials() >= 6);
        assert!(study.n_trials() <= 9, "ran {} trials", study.n_trials());
        assert_eq!(calls.load(Ordering::SeqCst), study.n_trials());
    }

    #[test]
    fn parallel_objective_error_is_returned() {
        let objective = |trial: &Trial| -> Result<f64, ObjectiveError> {
            if trial.number == 7 {
                Err(ObjectiveError::Diverged(7))
            } else {
                Ok(0.0)
            }
        };
        let runner = BoundedSearchRunner::new(objective, "parallel_fail", ObjectiveDirection::Maximize)
            .with_engine(StudyEngine::default().with_concurrency(3));

        assert_eq!(runner.optimize(50, 50), Err(ObjectiveError::Diverged(7)));
    }

    #[test]
    fn config_drives_budget() {
        let values = [3.0, 2.0, 1.0, 0.0, 0.0, 0.0];
        let calls = AtomicUsize::new(0);
        let runner =
            BoundedSearchRunner::new(replay(&values, &calls), "cfg", ObjectiveDirection::Maximize);

        let config = SearchConfig::new(6, 2);
        let best = runner.optimize_with::<SearchError>(&config).unwrap();
        assert_eq!(best.value, 3.0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn optimize_with_validates_the_whole_config() {
        let values = [1.0; 10];
        let calls = AtomicUsize::new(0);
        let runner =
            BoundedSearchRunner::new(replay(&values, &calls), "cfg", ObjectiveDirection::Maximize);

        let config = SearchConfig::new(10, 10).with_concurrency(0);
        assert!(matches!(
            runner.optimize_with::<SearchError>(&config),
            Err(SearchError::InvalidConfiguration { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runner_from_config_applies_engine_settings() {
        let config = SearchConfig::new(12, 12).with_concurrency(3).with_seed(5);
        let space = || SearchSpace::new().add_float("x", -4.0, 4.0);
        let objective = |trial: &Trial| -> Result<f64, SearchError> {
            let x = trial.float("x")?;
            Ok(x * x)
        };

        let a = BoundedSearchRunner::from_config(
            objective,
            "seeded",
            ObjectiveDirection::Minimize,
            space(),
            &config,
        )
        .unwrap();
        assert_eq!(a.engine().concurrency(), 3);

        let b = BoundedSearchRunner::from_config(
            objective,
            "seeded",
            ObjectiveDirection::Minimize,
            space(),
            &config.clone().with_concurrency(1),
        )
        .unwrap();

        let best_a = a.optimize_with::<SearchError>(&config).unwrap();
        let best_b = b.optimize::<SearchError>(12, 12).unwrap();
        // Same seed, same proposals, whatever order they finish in.
        assert_relative_eq!(best_a.value, best_b.value);
    }

    #[test]
    fn search_config_from_json() {
        let config = SearchConfig::from_json(r#"{"max_trials": 50, "patience": 5, "seed": 9}"#)
            .unwrap();
        assert_eq!(config, SearchConfig::new(50, 5).with_seed(9));

        assert!(SearchConfig::from_json(r#"{"max_trials": 0, "patience": 5}"#).is_err());
        assert!(SearchConfig::new(10, 2).with_concurrency(0).validate().is_err());
    }

    #[test]
    fn engine_from_config() {
        let space = SearchSpace::new().add_float("x", 0.0, 1.0);
        let engine =
            StudyEngine::from_config(space, &SearchConfig::new(10, 3).with_concurrency(2)).unwrap();
        assert_eq!(engine.concurrency(), 2);
        assert_eq!(engine.sampler_name(), "random");

        let bad_space = SearchSpace::new().add_int("n", 5, 1);
        assert!(StudyEngine::from_config(bad_space, &SearchConfig::default()).is_err());
    }
}
