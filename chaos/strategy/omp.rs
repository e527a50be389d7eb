//! Greedy selection of the active set by orthogonal matching pursuit.
//!
//! Each output component starts from the constant function alone. Every
//! iteration adds the candidate most correlated with the current residual,
//! refits through an incremental update of the least-squares factorization
//! and scores the fit with a cross-validation error. The best-scoring active
//! set seen so far is kept as a checkpoint, and the loop stops once the error
//! degrades past the configured bounds.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::{ExpansionError, ExpansionSetup, ExpansionStrategy};
use crate::design::{DesignError, DesignProxy};
use crate::fitting::FittingAlgorithm;
use crate::least_squares::{LeastSquaresError, LeastSquaresMethod};
use crate::result::FunctionalChaosResult;

/// Correlations below this fraction of the output's RMS are round-off.
const CORRELATION_TOLERANCE: f64 = 1e-10;

/// Reported after every greedy iteration of every output component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GreedyProgress {
    pub output_index: usize,
    pub iteration: usize,
    pub max_iterations: usize,
    pub error: f64,
    pub best_error: f64,
}

pub type ProgressCallback = Arc<dyn Fn(&GreedyProgress) + Send + Sync>;

/// Selection history of one output component.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GreedyTrace {
    /// Error after each fit, the initial constant fit first.
    pub errors: Vec<f64>,
    /// Best error checkpointed so far, aligned with `errors`.
    pub best_errors: Vec<f64>,
    /// Ranks in the order they were added.
    pub selected: Vec<usize>,
    pub iterations: usize,
}

struct ComponentFit {
    ranks: Vec<usize>,
    coefficients: Array1<f64>,
    trace: GreedyTrace,
}

/// Greedy expansion with cross-validated stopping.
pub struct OrthogonalMatchingPursuit {
    setup: ExpansionSetup,
    fitting: Arc<dyn FittingAlgorithm>,
    progress: Option<ProgressCallback>,
}

impl fmt::Debug for OrthogonalMatchingPursuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrthogonalMatchingPursuit")
            .field("setup", &self.setup)
            .field("fitting", &self.fitting)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl OrthogonalMatchingPursuit {
    pub fn new(setup: ExpansionSetup, fitting: Arc<dyn FittingAlgorithm>) -> Self {
        Self {
            setup,
            fitting,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn select_component(
        &self,
        output_index: usize,
        y: ArrayView1<f64>,
    ) -> Result<ComponentFit, ExpansionError> {
        let setup = &self.setup;
        let config = setup.config();
        let proxy = setup.proxy();
        let n = setup.sample_size();
        let max_iterations = (config.basis_size - 1).min(n - 1);

        let mut solver =
            LeastSquaresMethod::new(proxy, setup.weights(), &[0], config.decomposition_method)?;
        let mut coefficients = solver.solve(y)?;
        let mut error = self.fitting.error(&solver, y, coefficients.view())?;
        let mut best_error = error;
        let mut best = (solver.active_ranks().to_vec(), coefficients.clone());
        let mut trace = GreedyTrace {
            errors: vec![error],
            best_errors: vec![best_error],
            ..GreedyTrace::default()
        };
        let mut active = vec![false; config.basis_size];
        active[0] = true;
        let mut residual = &y - &solver.fitted_values(coefficients.view());
        let scale = (y.dot(&y) / n as f64).sqrt();

        for iteration in 1..=max_iterations {
            let Some((rank, score)) = most_correlated(proxy, &active, residual.view())? else {
                break;
            };
            if !(score > CORRELATION_TOLERANCE * scale) {
                log::debug!(
                    "Output {output_index}: residual is uncorrelated with every candidate, stopping"
                );
                break;
            }
            let kept = solver.active_ranks().to_vec();
            match solver.update(proxy, &[rank], &kept, &[]) {
                Ok(()) => {}
                Err(LeastSquaresError::NumericalFailure(reason)) => {
                    log::debug!("Output {output_index}: cannot add rank {rank} ({reason}), stopping");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            active[rank] = true;
            coefficients = solver.solve(y)?;
            error = self.fitting.error(&solver, y, coefficients.view())?;
            residual = &y - &solver.fitted_values(coefficients.view());

            let improved = error < best_error;
            if improved {
                best_error = error;
                best = (solver.active_ranks().to_vec(), coefficients.clone());
            }
            trace.selected.push(rank);
            trace.errors.push(error);
            trace.best_errors.push(best_error);
            trace.iterations = iteration;
            log::debug!(
                "Output {output_index}, iteration {iteration}: added rank {rank}, error {error:.3e}, best {best_error:.3e}"
            );
            if let Some(progress) = &self.progress {
                progress(&GreedyProgress {
                    output_index,
                    iteration,
                    max_iterations,
                    error,
                    best_error,
                });
            }
            let stalled = !improved
                && (error > config.max_error_factor * best_error || error > config.maximum_error);
            if stalled {
                log::debug!("Output {output_index}: error no longer improving, stopping");
                break;
            }
            if best_error < config.error_threshold {
                log::debug!(
                    "Output {output_index}: best error {best_error:.3e} is below the threshold"
                );
                break;
            }
        }

        let (ranks, coefficients) = best;
        Ok(ComponentFit {
            ranks,
            coefficients,
            trace,
        })
    }
}

/// The inactive candidate maximising `|Σᵢ φₖ(xᵢ) rᵢ| / n`, with its score.
/// Ties keep the lowest rank.
fn most_correlated(
    proxy: &DesignProxy,
    active: &[bool],
    residual: ArrayView1<f64>,
) -> Result<Option<(usize, f64)>, DesignError> {
    let n = residual.len() as f64;
    let scores = (0..active.len())
        .into_par_iter()
        .filter(|&rank| !active[rank])
        .map(|rank| Ok((rank, proxy.column(rank)?.dot(&residual).abs() / n)))
        .collect::<Result<Vec<(usize, f64)>, DesignError>>()?;
    Ok(scores
        .into_iter()
        .fold(None, |best: Option<(usize, f64)>, (rank, score)| match best {
            Some((_, top)) if !(score > top) => best,
            _ => Some((rank, score)),
        }))
}

/// Union of the per-component selections. Coefficients below `epsilon` in
/// magnitude become zero and ranks left all-zero are dropped; if nothing
/// survives, the constant function with zero coefficients is returned.
fn merge_components(fits: &[ComponentFit], epsilon: f64) -> (Vec<usize>, Array2<f64>) {
    let significant = |c: f64| c.abs() >= epsilon;
    let indices: Vec<usize> = fits
        .iter()
        .flat_map(|fit| {
            fit.ranks
                .iter()
                .zip(fit.coefficients.iter())
                .filter(move |(_, c)| significant(**c))
                .map(|(&rank, _)| rank)
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if indices.is_empty() {
        return (vec![0], Array2::zeros((1, fits.len())));
    }
    let mut coefficients = Array2::<f64>::zeros((indices.len(), fits.len()));
    for (k, fit) in fits.iter().enumerate() {
        for (&rank, &c) in fit.ranks.iter().zip(fit.coefficients.iter()) {
            if !significant(c) {
                continue;
            }
            if let Ok(row) = indices.binary_search(&rank) {
                coefficients[[row, k]] = c;
            }
        }
    }
    (indices, coefficients)
}

impl ExpansionStrategy for OrthogonalMatchingPursuit {
    fn setup(&self) -> &ExpansionSetup {
        &self.setup
    }

    fn run(&mut self) -> Result<FunctionalChaosResult, ExpansionError> {
        self.fitting.check(self.setup.sample_size())?;
        let candidates: Vec<usize> = (0..self.setup.config().basis_size).collect();
        self.setup.proxy_mut().fill(&candidates)?;
        log::info!(
            "Greedy selection over {} candidates for {} outputs ({:?})",
            candidates.len(),
            self.setup.output_dimension(),
            self.fitting
        );

        let output = self.setup.output_sample();
        let fits = (0..output.ncols())
            .into_par_iter()
            .map(|k| self.select_component(k, output.column(k)))
            .collect::<Result<Vec<_>, _>>()?;
        let (indices, coefficients) =
            merge_components(&fits, self.setup.config().small_coefficient_epsilon);
        let traces = fits.into_iter().map(|fit| fit.trace).collect();
        self.setup.assemble(indices, coefficients, true, true, traces)
    }
}
