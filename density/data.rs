//! # Problem Context
//!
//! This module defines the read-only problem context shared by the whole
//! fitting pipeline: the global basis-evaluation matrix (rows index the
//! observations, columns the FEM nodes; in the spatio-temporal setting the
//! tensor-product matrix over space and time nodes), the candidate grid of
//! smoothing parameters, the fold count for cross-validation, and the flag
//! requesting confidence-interval computation.
//!
//! The space-only and spatio-temporal pipelines differ only in the shape of
//! the smoothing parameter (one positive real versus a spatial/temporal
//! pair), so the context is generic over [`SmoothingParam`] instead of being
//! duplicated per setting.

use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A smoothing-parameter value drawn from the candidate grid.
///
/// Implemented by [`Lambda`] (a bare positive real, space-only setting) and
/// by [`LambdaPair`] (spatio-temporal setting). Values are immutable once a
/// run has selected one.
pub trait SmoothingParam:
    Copy + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Whether the value lies in the admissible range (strictly positive and
    /// finite in every component).
    fn is_admissible(&self) -> bool;
}

/// The smoothing parameter of the space-only setting.
pub type Lambda = f64;

impl SmoothingParam for f64 {
    fn is_admissible(&self) -> bool {
        self.is_finite() && *self > 0.0
    }
}

/// A (spatial, temporal) smoothing-parameter pair for the tensor-product
/// basis of the spatio-temporal setting.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LambdaPair {
    pub space: f64,
    pub time: f64,
}

impl LambdaPair {
    pub fn new(space: f64, time: f64) -> Self {
        Self { space, time }
    }
}

impl fmt::Display for LambdaPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(lambda_S = {}, lambda_T = {})", self.space, self.time)
    }
}

impl SmoothingParam for LambdaPair {
    fn is_admissible(&self) -> bool {
        self.space.is_finite() && self.space > 0.0 && self.time.is_finite() && self.time > 0.0
    }
}

/// Errors raised while assembling the problem context.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("the basis-evaluation matrix has no rows: at least one observation is required")]
    NoObservations,

    #[error("the basis-evaluation matrix has no columns: the mesh must carry at least one node")]
    NoNodes,

    #[error("smoothing-parameter candidate {index} ({value}) is outside the admissible range")]
    InadmissibleLambda { index: usize, value: String },
}

/// Read-only problem context for one density-estimation run.
///
/// Constructed once, before the preprocess phase, and outlives every
/// component that reads it. The basis matrix and the candidate grid are never
/// mutated after construction, so the context can be shared freely across the
/// cross-validation workers.
#[derive(Debug, Clone)]
pub struct DataProblem<P: SmoothingParam> {
    basis: Array2<f64>,
    lambda_grid: Vec<P>,
    n_folds: usize,
    inference: bool,
}

impl<P: SmoothingParam> DataProblem<P> {
    /// Validates and wraps the inputs of a run. Grid entries must be
    /// admissible; an empty grid is legal here and rejected later by the
    /// preprocess phase, which owns that failure mode.
    pub fn new(
        basis: Array2<f64>,
        lambda_grid: Vec<P>,
        n_folds: usize,
        inference: bool,
    ) -> Result<Self, DataError> {
        if basis.nrows() == 0 {
            return Err(DataError::NoObservations);
        }
        if basis.ncols() == 0 {
            return Err(DataError::NoNodes);
        }
        for (index, lambda) in lambda_grid.iter().enumerate() {
            if !lambda.is_admissible() {
                return Err(DataError::InadmissibleLambda {
                    index,
                    value: lambda.to_string(),
                });
            }
        }
        Ok(Self {
            basis,
            lambda_grid,
            n_folds,
            inference,
        })
    }

    /// The global (non-folded) basis-evaluation matrix.
    pub fn global_basis(&self) -> ArrayView2<'_, f64> {
        self.basis.view()
    }

    pub fn n_observations(&self) -> usize {
        self.basis.nrows()
    }

    pub fn n_nodes(&self) -> usize {
        self.basis.ncols()
    }

    pub fn lambda_grid(&self) -> &[P] {
        &self.lambda_grid
    }

    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    /// Whether the caller asked for confidence intervals on the fitted
    /// log-density.
    pub fn inference_requested(&self) -> bool {
        self.inference
    }

    /// Row-restriction of the global basis matrix, used to carve out the
    /// train/validation submatrices of one fold.
    pub fn basis_rows(&self, rows: &[usize]) -> Array2<f64> {
        self.basis.select(Axis(0), rows)
    }
}
