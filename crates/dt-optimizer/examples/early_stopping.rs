//! Tune the bin count of a drift check, stopping once the score plateaus.
//!
//! Run with: `RUST_LOG=info cargo run -p dt-optimizer --example early_stopping`

use dt_drift::population_stability_index;
use dt_optimizer::{
    BoundedSearchRunner, ObjectiveDirection, SearchConfig, SearchSpace, StudyEngine, Trial,
};
use dt_types::{DtError, DtResult};
use tracing_subscriber::EnvFilter;

fn main() -> DtResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let initial: Vec<f64> = (0..500).map(|i| ((i * 37) % 101) as f64).collect();
    let new: Vec<f64> = (0..400).map(|i| ((i * 53) % 89) as f64 + 6.0).collect();

    let config = SearchConfig::new(60, 8).with_seed(7).with_concurrency(2);
    let space = SearchSpace::new().add_int("bin_counts", 2, 40);

    let objective = |trial: &Trial| -> Result<f64, DtError> {
        let bins = trial.int("bin_counts")? as usize;
        Ok(population_stability_index(&initial, &new, bins, 1e-4)?)
    };

    let runner = BoundedSearchRunner::new(objective, "psi_bins", ObjectiveDirection::Maximize)
        .with_engine(StudyEngine::from_config(space, &config)?);

    let study = runner.run_study::<DtError>(config.max_trials, config.patience)?;
    if let Some(best) = study.best_trial() {
        println!(
            "{:?} after {} trials: best PSI {:.4} with {} bins",
            study.termination(),
            study.n_trials(),
            best.value,
            best.params["bin_counts"],
        );
    }

    Ok(())
}
