//! # Fitting Orchestrator
//!
//! Sequences one full density-estimation run: the preprocess phase (density
//! initialization and, when the grid holds more than one candidate,
//! cross-validated smoothing-parameter selection), the final minimization
//! descent on the full data with the selected parameter(s), and the optional
//! covariance-based confidence-interval step.
//!
//! The orchestrator holds the terminal results of the run. `apply` writes
//! them exactly once per call; calling it again re-runs the whole pipeline
//! and overwrites them. It takes `&mut self`, so concurrent application on a
//! single instance is ruled out at compile time — callers wanting parallel
//! runs construct one estimator per run.

use crate::data::{DataProblem, SmoothingParam};
use crate::functional::{
    ConfidenceBand, CovarianceError, CvErrorMetric, DensityInitialization, FunctionalProblem,
    MinimizationAlgorithm, MinimizationError,
};
use crate::preprocess::{Preprocess, PreprocessError, PreprocessStrategy};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// A failed run, tagged with the pipeline stage that broke.
#[derive(Error, Debug)]
pub enum FitError {
    #[error("preprocess phase failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("final minimization on the full data failed: {0}")]
    FinalMinimization(#[source] MinimizationError),

    #[error("confidence-interval computation failed: {0}")]
    Inference(#[from] CovarianceError),
}

/// Owned summary of a completed fit, ready for marshaling by a binding layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult<P> {
    /// Fitted log-density coefficients over the FEM nodes.
    pub g: Array1<f64>,
    /// Confidence band around `g`; empty unless inference was requested.
    pub band: ConfidenceBand,
    /// The selected smoothing parameter(s).
    pub best_lambda: P,
    /// Aggregated CV error per grid candidate; empty without
    /// cross-validation.
    pub cv_errors: Vec<f64>,
}

/// Orchestrator of the fitting pipeline (space-only with `P = Lambda`,
/// spatio-temporal with `P = LambdaPair`).
pub struct DensityEstimator<'a, P, M, F>
where
    P: SmoothingParam,
    M: MinimizationAlgorithm<P>,
    F: FunctionalProblem<P>,
{
    problem: &'a DataProblem<P>,
    functional: &'a F,
    minimizer: M,
    preprocess: Preprocess<'a, P, M>,
    g_coeff: Array1<f64>,
    band: ConfidenceBand,
    f_init: Vec<Arc<Array1<f64>>>,
    best_lambda: Option<P>,
    cv_errors: Vec<f64>,
}

impl<'a, P, M, F> DensityEstimator<'a, P, M, F>
where
    P: SmoothingParam,
    M: MinimizationAlgorithm<P>,
    F: FunctionalProblem<P>,
{
    pub fn new(
        problem: &'a DataProblem<P>,
        functional: &'a F,
        initializer: &'a dyn DensityInitialization<P>,
        metric: &'a dyn CvErrorMetric,
        minimizer: M,
        strategy: PreprocessStrategy,
    ) -> Self {
        let preprocess = Preprocess::new(problem, initializer, metric, minimizer.clone(), strategy);
        Self {
            problem,
            functional,
            minimizer,
            preprocess,
            g_coeff: Array1::zeros(0),
            band: ConfidenceBand::empty(),
            f_init: Vec::new(),
            best_lambda: None,
            cv_errors: Vec::new(),
        }
    }

    /// Runs the whole pipeline, strictly in order: preprocess, collection of
    /// its outputs, final minimization on the full basis matrix, and — iff
    /// the problem requested it — the confidence-interval computation. Any
    /// failure aborts the run and leaves no partial results behind.
    pub fn apply(&mut self) -> Result<(), FitError> {
        self.g_coeff = Array1::zeros(0);
        self.band = ConfidenceBand::empty();
        self.f_init.clear();
        self.best_lambda = None;
        self.cv_errors.clear();

        log::info!("preprocess phase");
        self.preprocess.perform_preprocess_task()?;

        let (f_init, g_init, best_lambda) = self
            .preprocess
            .preprocess_parameter()
            .expect("preprocess task completed without a selection");
        let g_init = g_init.clone();
        self.f_init = f_init.to_vec();
        self.best_lambda = Some(best_lambda);
        self.cv_errors = self.preprocess.cv_error().to_vec();

        log::info!("final minimization descent with {best_lambda}");
        self.g_coeff = self
            .minimizer
            .solve(self.problem.global_basis(), best_lambda, g_init.view())
            .map_err(FitError::FinalMinimization)?;

        if self.problem.inference_requested() {
            log::info!("confidence-interval computation");
            self.band = self.functional.covariance_ci(self.g_coeff.view(), best_lambda)?;
        }
        Ok(())
    }

    /// Fitted log-density coefficients; empty before a successful `apply`.
    pub fn density_g(&self) -> &Array1<f64> {
        &self.g_coeff
    }

    /// Confidence band around the fitted coefficients; empty when inference
    /// was not requested (or before `apply`).
    pub fn confidence_band(&self) -> &ConfidenceBand {
        &self.band
    }

    /// The initial density produced for each grid candidate.
    pub fn initial_density(&self) -> &[Arc<Array1<f64>>] {
        &self.f_init
    }

    pub fn best_lambda(&self) -> Option<P> {
        self.best_lambda
    }

    /// Aggregated CV error per candidate; empty when no cross-validation ran.
    pub fn cv_error(&self) -> &[f64] {
        &self.cv_errors
    }

    /// Minimum per-fold loss per candidate (RightCV diagnostic).
    pub fn best_loss(&self) -> &[f64] {
        self.preprocess.best_loss()
    }

    /// Packages the terminal results of a completed run; `None` before a
    /// successful `apply`.
    pub fn result(&self) -> Option<FitResult<P>> {
        self.best_lambda.map(|best_lambda| FitResult {
            g: self.g_coeff.clone(),
            band: self.band.clone(),
            best_lambda,
            cv_errors: self.cv_errors.clone(),
        })
    }
}
