//! Trial engines: propose, evaluate and record trials for a study.
//!
//! [`TrialEngine`] is the seam the search runner drives. [`StudyEngine`] is the
//! bundled implementation: a [`Sampler`] proposes parameters and trials run
//! either inline or on a pool of scoped worker threads.

use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

use dt_types::SearchError;

use crate::runner::SearchConfig;
use crate::search::{RandomSampler, Sampler, SearchSpace};
use crate::trial::{ObjectiveDirection, Study, Termination, Trial, TrialResult};

/// A trial-based optimization engine.
pub trait TrialEngine {
    /// Open a fresh study.
    fn create_run(&self, direction: ObjectiveDirection, name: &str) -> Study;

    /// Run up to `max_trials` trials of `objective` against `study`.
    ///
    /// `on_trial_complete` is invoked once per completed trial, after the
    /// trial is recorded, one call at a time. Returning `Break` stops new
    /// proposals; the run then finishes normally with the best trial so far.
    /// Objective errors are returned as-is.
    fn run<F, E, C>(
        &self,
        study: &mut Study,
        objective: &F,
        max_trials: usize,
        on_trial_complete: C,
    ) -> Result<TrialResult, E>
    where
        F: Fn(&Trial) -> Result<f64, E> + Sync,
        E: From<SearchError> + Send,
        C: FnMut(&Study, &TrialResult) -> ControlFlow<()>;

    /// Trials evaluated at once.
    fn concurrency(&self) -> usize {
        1
    }
}

/// What a worker hands back for one dispatched trial.
enum WorkerOutcome<E> {
    Finished(Result<TrialResult, E>),
    Panicked(Box<dyn Any + Send>),
}

/// Sampler-driven engine with optional parallel trial execution.
pub struct StudyEngine {
    sampler: Mutex<Box<dyn Sampler>>,
    concurrency: usize,
}

impl Default for StudyEngine {
    /// Random sampling over an empty space, one trial at a time.
    fn default() -> Self {
        Self::new(RandomSampler::with_rng(SearchSpace::new(), StdRng::from_os_rng()))
    }
}

impl StudyEngine {
    pub fn new(sampler: impl Sampler + 'static) -> Self {
        Self {
            sampler: Mutex::new(Box::new(sampler)),
            concurrency: 1,
        }
    }

    /// Random sampling over `space`, seeded and parallelised per `config`.
    pub fn from_config(space: SearchSpace, config: &SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        let sampler = match config.seed {
            Some(seed) => RandomSampler::seeded(space, seed)?,
            None => RandomSampler::new(space)?,
        };
        Ok(Self::new(sampler).with_concurrency(config.concurrency))
    }

    /// Number of trials evaluated at once (minimum 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn sampler_name(&self) -> String {
        self.sampler.lock().name().to_string()
    }

    fn run_inline<F, E, C>(
        &self,
        study: &mut Study,
        objective: &F,
        max_trials: usize,
        mut on_trial_complete: C,
    ) -> Result<Termination, E>
    where
        F: Fn(&Trial) -> Result<f64, E>,
        E: From<SearchError>,
        C: FnMut(&Study, &TrialResult) -> ControlFlow<()>,
    {
        let mut sampler = self.sampler.lock();

        for number in 0..max_trials {
            let Some(params) = sampler.suggest(number) else {
                debug!("Sampler {} exhausted after {} trials", sampler.name(), number);
                return Ok(Termination::ExhaustedBudget);
            };

            let result = evaluate_trial(objective, Trial::new(study.id, number, params))?;
            sampler.report(&result.params, result.value);
            if complete_trial(study, result, &mut on_trial_complete).is_break() {
                return Ok(Termination::EarlyStopped);
            }
        }

        Ok(Termination::ExhaustedBudget)
    }

    fn run_parallel<F, E, C>(
        &self,
        study: &mut Study,
        objective: &F,
        max_trials: usize,
        mut on_trial_complete: C,
    ) -> Result<Termination, E>
    where
        F: Fn(&Trial) -> Result<f64, E> + Sync,
        E: From<SearchError> + Send,
        C: FnMut(&Study, &TrialResult) -> ControlFlow<()>,
    {
        let workers = self.concurrency.min(max_trials);
        let (job_tx, job_rx) = unbounded::<Trial>();
        let (done_tx, done_rx) = unbounded::<WorkerOutcome<E>>();

        let (outcome, panic_payload) = thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                scope.spawn(move || {
                    for trial in job_rx.iter() {
                        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
                            evaluate_trial(objective, trial)
                        })) {
                            Ok(result) => WorkerOutcome::Finished(result),
                            Err(payload) => WorkerOutcome::Panicked(payload),
                        };
                        if done_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(done_tx);

            let mut sampler = self.sampler.lock();
            let mut dispatched = 0;
            let mut in_flight = 0;
            let mut exhausted = false;
            let mut termination = Termination::ExhaustedBudget;
            let mut failure: Option<E> = None;
            let mut panic_payload: Option<Box<dyn Any + Send>> = None;

            let study_id = study.id;
            let dispatch = |sampler: &mut dyn Sampler, dispatched: &mut usize| -> bool {
                match sampler.suggest(*dispatched) {
                    Some(params) => {
                        let _ = job_tx.send(Trial::new(study_id, *dispatched, params));
                        *dispatched += 1;
                        true
                    }
                    None => false,
                }
            };

            while in_flight < workers && dispatched < max_trials {
                if !dispatch(&mut **sampler, &mut dispatched) {
                    exhausted = true;
                    break;
                }
                in_flight += 1;
            }

            // Every dispatched trial reports exactly once, panics included.
            while in_flight > 0 {
                let Ok(outcome) = done_rx.recv() else { break };
                in_flight -= 1;

                match outcome {
                    WorkerOutcome::Finished(Ok(result)) => {
                        sampler.report(&result.params, result.value);
                        if complete_trial(study, result, &mut on_trial_complete).is_break()
                            && termination != Termination::EarlyStopped
                        {
                            debug!("Stop requested; draining {} in-flight trials", in_flight);
                            termination = Termination::EarlyStopped;
                        }
                    }
                    WorkerOutcome::Finished(Err(e)) => {
                        if failure.is_none() {
                            warn!("Objective failed; draining {} in-flight trials", in_flight);
                            failure = Some(e);
                        }
                    }
                    WorkerOutcome::Panicked(payload) => {
                        if panic_payload.is_none() {
                            warn!("Objective panicked; draining {} in-flight trials", in_flight);
                            panic_payload = Some(payload);
                        }
                    }
                }

                let keep_going = failure.is_none()
                    && panic_payload.is_none()
                    && termination == Termination::ExhaustedBudget
                    && !exhausted
                    && dispatched < max_trials;
                if keep_going {
                    if dispatch(&mut **sampler, &mut dispatched) {
                        in_flight += 1;
                    } else {
                        exhausted = true;
                    }
                }
            }

            // Workers only exit once the job queue closes.
            drop(job_tx);
            let outcome = match failure {
                Some(e) => Err(e),
                None => Ok(termination),
            };
            (outcome, panic_payload)
        });

        if let Some(payload) = panic_payload {
            study.mark_failed(format!(
                "objective panicked after {} completed trials",
                study.n_trials()
            ));
            panic::resume_unwind(payload);
        }
        outcome
    }
}

impl TrialEngine for StudyEngine {
    fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn create_run(&self, direction: ObjectiveDirection, name: &str) -> Study {
        Study::new(name, direction)
    }

    fn run<F, E, C>(
        &self,
        study: &mut Study,
        objective: &F,
        max_trials: usize,
        on_trial_complete: C,
    ) -> Result<TrialResult, E>
    where
        F: Fn(&Trial) -> Result<f64, E> + Sync,
        E: From<SearchError> + Send,
        C: FnMut(&Study, &TrialResult) -> ControlFlow<()>,
    {
        if max_trials == 0 {
            return Err(SearchError::InvalidConfiguration {
                message: "max_trials must be at least 1".to_string(),
            }
            .into());
        }

        study.mark_running();
        info!(
            "Starting study {} ({:?}, {} sampler, up to {} trials, concurrency {})",
            study.name,
            study.direction,
            self.sampler_name(),
            max_trials,
            self.concurrency
        );

        let outcome = if self.concurrency > 1 {
            self.run_parallel(study, objective, max_trials, on_trial_complete)
        } else {
            self.run_inline(study, objective, max_trials, on_trial_complete)
        };

        match outcome {
            Ok(termination) => {
                study.mark_completed(termination);
                study.best_trial.clone().ok_or_else(|| {
                    SearchError::NoCompletedTrials {
                        study: study.name.clone(),
                    }
                    .into()
                })
            }
            Err(e) => {
                study.mark_failed(format!(
                    "objective failed after {} completed trials",
                    study.n_trials()
                ));
                Err(e)
            }
        }
    }
}

fn evaluate_trial<F, E>(objective: &F, trial: Trial) -> Result<TrialResult, E>
where
    F: Fn(&Trial) -> Result<f64, E>,
    E: From<SearchError>,
{
    let started = Instant::now();
    let value = objective(&trial)?;
    if value.is_nan() {
        return Err(SearchError::NanObjective {
            trial_number: trial.number,
        }
        .into());
    }
    Ok(trial.complete(value, started.elapsed()))
}

fn complete_trial<C>(
    study: &mut Study,
    result: TrialResult,
    on_trial_complete: &mut C,
) -> ControlFlow<()>
where
    C: FnMut(&Study, &TrialResult) -> ControlFlow<()>,
{
    debug!(
        "Trial {} finished with {} in {} ms",
        result.number, result.value, result.duration_ms
    );
    study.record(result.clone());
    on_trial_complete(study, &result)
}
