//! Deterministic mock collaborators and synthetic bases for pipeline tests.
//!
//! Everything here is reproducible bit-for-bit: the mocks encode the
//! smoothing parameter into their output instead of doing real numerics, so
//! tests can script candidate-dependent validation errors and count solver
//! invocations without touching a mesh or a descent scheme.

use crate::data::{LambdaPair, SmoothingParam};
use crate::functional::{
    ConfidenceBand, CovarianceError, CvErrorMetric, DensityInitialization, FunctionalProblem,
    InitializationError, MinimizationAlgorithm, MinimizationError,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Piecewise-linear (hat-function) basis on `[0, 1]` evaluated at the given
/// observation locations. Rows index observations, columns the mesh nodes.
pub fn hat_basis_at(points: &[f64], n_nodes: usize) -> Array2<f64> {
    assert!(n_nodes >= 2, "a 1-D mesh needs at least two nodes");
    let h = 1.0 / (n_nodes as f64 - 1.0);
    let mut psi = Array2::zeros((points.len(), n_nodes));
    for (i, &x) in points.iter().enumerate() {
        for j in 0..n_nodes {
            let t = 1.0 - (x - j as f64 * h).abs() / h;
            if t > 0.0 {
                psi[[i, j]] = t;
            }
        }
    }
    psi
}

/// Hat basis evaluated at `n_observations` uniformly spaced points.
pub fn hat_basis(n_observations: usize, n_nodes: usize) -> Array2<f64> {
    let points: Vec<f64> = (0..n_observations)
        .map(|i| i as f64 / (n_observations.max(2) - 1) as f64)
        .collect();
    hat_basis_at(&points, n_nodes)
}

/// Initializer returning the flat density `f ≡ 1` for every candidate, so
/// every seed coefficient vector is exactly zero after the log transform.
pub struct UniformInitializer {
    pub n_nodes: usize,
}

impl<P: SmoothingParam> DensityInitialization<P> for UniformInitializer {
    fn initial_density(&self, _lambda: P) -> Result<Arc<Array1<f64>>, InitializationError> {
        Ok(Arc::new(Array1::from_elem(self.n_nodes, 1.0)))
    }
}

/// Initializer that always fails, for error-path tests.
pub struct FailingInitializer;

impl<P: SmoothingParam> DensityInitialization<P> for FailingInitializer {
    fn initial_density(&self, _lambda: P) -> Result<Arc<Array1<f64>>, InitializationError> {
        Err(InitializationError::Failed("heat diffusion diverged".into()))
    }
}

/// Minimizer that returns its seed unchanged and counts every invocation.
/// Clones share the counter, so the total includes calls made by
/// cross-validation workers.
#[derive(Clone)]
pub struct CountingMinimizer {
    calls: Arc<AtomicUsize>,
}

impl CountingMinimizer {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for CountingMinimizer {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SmoothingParam> MinimizationAlgorithm<P> for CountingMinimizer {
    fn solve(
        &mut self,
        _basis: ArrayView2<'_, f64>,
        _lambda: P,
        g_init: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, MinimizationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(g_init.to_owned())
    }
}

/// Minimizer whose output is the seed shifted by the smoothing parameter
/// (the pair variant shifts by `space + time`). Paired with
/// [`ScriptedMetric`], this lets a test assign a scripted validation error to
/// each grid candidate.
#[derive(Clone)]
pub struct SeedPlusLambda;

impl MinimizationAlgorithm<f64> for SeedPlusLambda {
    fn solve(
        &mut self,
        _basis: ArrayView2<'_, f64>,
        lambda: f64,
        g_init: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, MinimizationError> {
        Ok(g_init.mapv(|v| v + lambda))
    }
}

impl MinimizationAlgorithm<LambdaPair> for SeedPlusLambda {
    fn solve(
        &mut self,
        _basis: ArrayView2<'_, f64>,
        lambda: LambdaPair,
        g_init: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, MinimizationError> {
        Ok(g_init.mapv(|v| v + lambda.space + lambda.time))
    }
}

/// Minimizer that never converges.
#[derive(Clone)]
pub struct DivergingMinimizer;

impl<P: SmoothingParam> MinimizationAlgorithm<P> for DivergingMinimizer {
    fn solve(
        &mut self,
        _basis: ArrayView2<'_, f64>,
        _lambda: P,
        _g_init: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, MinimizationError> {
        Err(MinimizationError::DidNotConverge {
            max_iterations: 100,
            last_change: 1.0,
        })
    }
}

/// Metric returning the same error for every fit.
pub struct ConstMetric(pub f64);

impl CvErrorMetric for ConstMetric {
    fn l2_error(&self, _valid_basis: ArrayView2<'_, f64>, _g: ArrayView1<'_, f64>) -> f64 {
        self.0
    }
}

/// Metric that looks the fit's first coefficient up in a fixed table. Used
/// together with [`SeedPlusLambda`] and a zero seed, the first coefficient is
/// the candidate's smoothing parameter, so the table maps candidates to
/// scripted per-fold errors.
pub struct ScriptedMetric {
    table: Vec<(f64, f64)>,
}

impl ScriptedMetric {
    pub fn new(table: Vec<(f64, f64)>) -> Self {
        Self { table }
    }
}

impl CvErrorMetric for ScriptedMetric {
    fn l2_error(&self, _valid_basis: ArrayView2<'_, f64>, g: ArrayView1<'_, f64>) -> f64 {
        let key = g[0];
        self.table
            .iter()
            .find(|(k, _)| (k - key).abs() < 1e-9)
            .map(|&(_, v)| v)
            .unwrap_or(f64::INFINITY)
    }
}

/// Functional whose confidence band is the fit shifted by a fixed half-width.
pub struct SymmetricBand {
    pub half_width: f64,
}

impl<P: SmoothingParam> FunctionalProblem<P> for SymmetricBand {
    fn covariance_ci(
        &self,
        g: ArrayView1<'_, f64>,
        _lambda: P,
    ) -> Result<ConfidenceBand, CovarianceError> {
        Ok(ConfidenceBand::new(
            g.mapv(|v| v - self.half_width),
            g.mapv(|v| v + self.half_width),
        ))
    }
}

/// Functional whose covariance routine always reports a singular matrix.
pub struct SingularFunctional;

impl<P: SmoothingParam> FunctionalProblem<P> for SingularFunctional {
    fn covariance_ci(
        &self,
        _g: ArrayView1<'_, f64>,
        _lambda: P,
    ) -> Result<ConfidenceBand, CovarianceError> {
        Err(CovarianceError::SingularCovariance)
    }
}
