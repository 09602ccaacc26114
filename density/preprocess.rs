//! # Preprocess Phase
//!
//! Turns the problem context and the density initializer into the inputs of
//! the final minimization: one initial f-density per grid candidate, a seed
//! coefficient vector, and the selected smoothing parameter(s).
//!
//! Three strategies cover the domain, selected once at construction:
//!
//! - **NoCrossValidation** — the grid holds a single candidate; initialize,
//!   take the log as the seed, and select that candidate. No minimization
//!   runs here.
//! - **SimplifiedCV** — k-fold cross-validation with one cheap fit per
//!   candidate, for when per-fold minimization is the bottleneck and an
//!   approximate candidate ranking suffices.
//! - **RightCV** — k-fold cross-validation with a full independent
//!   minimization per candidate per fold, plus the per-candidate best-loss
//!   diagnostic.
//!
//! Configuration problems (empty grid, fold count incompatible with the
//! observation count) are rejected eagerly, before any fold loop executes.

use crate::cv::{CvError, CvVariant, FoldPartition, perform_cv};
use crate::data::{DataProblem, SmoothingParam};
use crate::functional::{
    CvErrorMetric, DensityInitialization, InitializationError, MinimizationAlgorithm,
};
use ndarray::Array1;
use std::sync::Arc;
use thiserror::Error;

/// The closed set of preprocess strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreprocessStrategy {
    NoCrossValidation,
    SimplifiedCv,
    RightCv,
}

impl PreprocessStrategy {
    /// Resolves the strategy names the host-language binding passes through.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "NoCrossValidation" => Some(Self::NoCrossValidation),
            "SimplifiedCV" => Some(Self::SimplifiedCv),
            "RightCV" => Some(Self::RightCv),
            _ => None,
        }
    }
}

/// A preprocessing failure. Carries the candidate (and, through [`CvError`],
/// the fold) at which the run broke down.
#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("the smoothing-parameter grid is empty")]
    EmptyGrid,

    #[error("NoCrossValidation requires a single grid candidate, found {found}")]
    SingleCandidateExpected { found: usize },

    #[error("cross-validation needs at least one fold")]
    ZeroFolds,

    #[error("{folds} folds requested but only {observations} observations are available; some folds would be empty")]
    TooManyFolds { folds: usize, observations: usize },

    #[error("density initialization failed for candidate {candidate}: {source}")]
    Initialization {
        candidate: usize,
        #[source]
        source: InitializationError,
    },

    #[error(transparent)]
    CrossValidation(#[from] CvError),
}

/// Seed and selection produced by a completed preprocess task.
struct Selected<P> {
    g_init: Array1<f64>,
    best_lambda: P,
}

/// The preprocess phase of one run.
///
/// `perform_preprocess_task` populates the internal tables exactly once;
/// afterwards the getters may be read any number of times. The initial
/// densities are shared handles owned jointly with the initializer, so they
/// stay valid for as long as the orchestrator needs them.
pub struct Preprocess<'a, P, M>
where
    P: SmoothingParam,
    M: MinimizationAlgorithm<P>,
{
    strategy: PreprocessStrategy,
    problem: &'a DataProblem<P>,
    initializer: &'a dyn DensityInitialization<P>,
    metric: &'a dyn CvErrorMetric,
    minimizer: M,
    f_init: Vec<Arc<Array1<f64>>>,
    selected: Option<Selected<P>>,
    cv_errors: Vec<f64>,
    best_loss: Vec<f64>,
}

impl<'a, P, M> Preprocess<'a, P, M>
where
    P: SmoothingParam,
    M: MinimizationAlgorithm<P>,
{
    pub fn new(
        problem: &'a DataProblem<P>,
        initializer: &'a dyn DensityInitialization<P>,
        metric: &'a dyn CvErrorMetric,
        minimizer: M,
        strategy: PreprocessStrategy,
    ) -> Self {
        Self {
            strategy,
            problem,
            initializer,
            metric,
            minimizer,
            f_init: Vec::new(),
            selected: None,
            cv_errors: Vec::new(),
            best_loss: Vec::new(),
        }
    }

    pub fn strategy(&self) -> PreprocessStrategy {
        self.strategy
    }

    /// Runs the strategy: initializes the per-candidate densities and either
    /// selects the grid's only candidate (NoCrossValidation) or drives the
    /// k-fold sweep. Re-running overwrites the previous tables.
    pub fn perform_preprocess_task(&mut self) -> Result<(), PreprocessError> {
        let grid = self.problem.lambda_grid();
        if grid.is_empty() {
            return Err(PreprocessError::EmptyGrid);
        }

        self.selected = None;
        self.cv_errors.clear();
        self.best_loss.clear();

        match self.strategy {
            PreprocessStrategy::NoCrossValidation => {
                if grid.len() != 1 {
                    return Err(PreprocessError::SingleCandidateExpected { found: grid.len() });
                }
                self.fill_f_init()?;
                log::info!("single smoothing parameter {}; skipping cross-validation", grid[0]);
                self.selected = Some(Selected {
                    g_init: log_density(&self.f_init[0]),
                    best_lambda: grid[0],
                });
            }
            PreprocessStrategy::SimplifiedCv | PreprocessStrategy::RightCv => {
                let k = self.problem.n_folds();
                if k == 0 {
                    return Err(PreprocessError::ZeroFolds);
                }
                let n = self.problem.n_observations();
                if k > n {
                    return Err(PreprocessError::TooManyFolds {
                        folds: k,
                        observations: n,
                    });
                }

                self.fill_f_init()?;
                let seeds: Vec<Arc<Array1<f64>>> = self
                    .f_init
                    .iter()
                    .map(|f| Arc::new(log_density(f)))
                    .collect();

                let variant = match self.strategy {
                    PreprocessStrategy::RightCv => CvVariant::Right,
                    _ => CvVariant::Simplified,
                };
                log::info!(
                    "{k}-fold cross-validation ({variant:?}) over {} candidates, {n} observations",
                    grid.len()
                );

                let partition = FoldPartition::cyclic(n, k);
                let outcome = perform_cv(
                    self.problem,
                    &partition,
                    &seeds,
                    &self.minimizer,
                    self.metric,
                    variant,
                )?;

                log::info!(
                    "selected smoothing parameter {} (candidate {})",
                    outcome.best_lambda,
                    outcome.best_index
                );
                self.cv_errors = outcome.cv_errors;
                self.best_loss = outcome.best_loss;
                self.selected = Some(Selected {
                    g_init: outcome.best_g,
                    best_lambda: outcome.best_lambda,
                });
            }
        }
        Ok(())
    }

    /// The per-candidate initial densities, the seed coefficient vector, and
    /// the selected smoothing parameter(s). `None` until a preprocess task
    /// has completed.
    pub fn preprocess_parameter(&self) -> Option<(&[Arc<Array1<f64>>], &Array1<f64>, P)> {
        self.selected
            .as_ref()
            .map(|s| (self.f_init.as_slice(), &s.g_init, s.best_lambda))
    }

    /// Aggregated CV error per grid candidate; empty when the strategy runs
    /// no cross-validation.
    pub fn cv_error(&self) -> &[f64] {
        &self.cv_errors
    }

    /// Minimum per-fold loss per candidate; populated by RightCV only.
    pub fn best_loss(&self) -> &[f64] {
        &self.best_loss
    }

    fn fill_f_init(&mut self) -> Result<(), PreprocessError> {
        self.f_init.clear();
        for (candidate, &lambda) in self.problem.lambda_grid().iter().enumerate() {
            let f = self
                .initializer
                .initial_density(lambda)
                .map_err(|source| PreprocessError::Initialization { candidate, source })?;
            if f.iter().any(|&v| !(v > 0.0)) {
                return Err(PreprocessError::Initialization {
                    candidate,
                    source: InitializationError::NonPositiveDensity,
                });
            }
            self.f_init.push(f);
        }
        Ok(())
    }
}

/// The descent works on the log-density g = ln f.
fn log_density(f: &Array1<f64>) -> Array1<f64> {
    f.mapv(f64::ln)
}
