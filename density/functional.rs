//! # Collaborator Contracts
//!
//! The core pipeline drives four external collaborators and only ever sees
//! them through the traits below: the density initializer that seeds the
//! descent for each candidate smoothing parameter, the iterative minimization
//! algorithm for the penalized functional at a fixed parameter, the L2 metric
//! scoring a fit against held-out observations, and the functional/loss
//! object whose covariance routine yields confidence intervals.
//!
//! Mesh assembly, sparse solves, and the descent schemes themselves live
//! behind these seams and are not reimplemented here.

use crate::data::SmoothingParam;
use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Failure of the density-initialization heuristic.
#[derive(Error, Debug, Clone)]
pub enum InitializationError {
    #[error("the initial density contains non-positive entries; its log cannot seed the descent")]
    NonPositiveDensity,

    #[error("density initialization failed: {0}")]
    Failed(String),
}

/// Failure of the iterative minimization of the penalized functional.
#[derive(Error, Debug, Clone)]
pub enum MinimizationError {
    #[error(
        "descent did not reach the stopping tolerance within {max_iterations} iterations (last functional change {last_change:.6e})"
    )]
    DidNotConverge {
        max_iterations: usize,
        last_change: f64,
    },

    #[error("the penalized functional evaluated to a non-finite value")]
    NonFiniteFunctional,
}

/// Failure of the covariance-based confidence-interval computation.
#[derive(Error, Debug, Clone)]
pub enum CovarianceError {
    #[error("the estimated covariance matrix is singular and cannot be inverted")]
    SingularCovariance,

    #[error("confidence-interval computation failed: {0}")]
    Failed(String),
}

/// Pointwise lower/upper interval around the fitted log-density coefficients.
///
/// Empty (zero-length) whenever inference was not requested for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub lower: Array1<f64>,
    pub upper: Array1<f64>,
}

impl ConfidenceBand {
    pub fn new(lower: Array1<f64>, upper: Array1<f64>) -> Self {
        debug_assert_eq!(lower.len(), upper.len());
        Self { lower, upper }
    }

    /// The band of a run that performed no inference.
    pub fn empty() -> Self {
        Self {
            lower: Array1::zeros(0),
            upper: Array1::zeros(0),
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }
}

/// Produces an initial f-density estimate for one candidate smoothing
/// parameter, used to seed the minimization descent.
///
/// The returned handle is shared: the initializer may cache and hand out the
/// same density for several candidates, and the preprocess phase keeps the
/// handles alive for the orchestrator to read back after fitting.
pub trait DensityInitialization<P: SmoothingParam>: Send + Sync {
    fn initial_density(&self, lambda: P) -> Result<Arc<Array1<f64>>, InitializationError>;
}

/// Scores a fitted log-density against held-out observations in L2 norm.
///
/// `valid_basis` is the fold's validation submatrix of the global basis
/// matrix; `g` the coefficients of the fit being scored.
pub trait CvErrorMetric: Send + Sync {
    fn l2_error(&self, valid_basis: ArrayView2<'_, f64>, g: ArrayView1<'_, f64>) -> f64;
}

/// Descends the penalized functional to convergence for a fixed smoothing
/// parameter, from the supplied seed coefficients.
///
/// Instances carry private descent state (step proposals, line-search
/// scratch), so they are never shared between workers: the cross-validation
/// engine clones one instance per (candidate, fold) task.
pub trait MinimizationAlgorithm<P: SmoothingParam>: Clone + Send {
    fn solve(
        &mut self,
        basis: ArrayView2<'_, f64>,
        lambda: P,
        g_init: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, MinimizationError>;
}

/// The functional/loss object of the run; the core only uses its covariance
/// routine, invoked once per run when inference is requested.
pub trait FunctionalProblem<P: SmoothingParam>: Send + Sync {
    fn covariance_ci(
        &self,
        g: ArrayView1<'_, f64>,
        lambda: P,
    ) -> Result<ConfidenceBand, CovarianceError>;
}
