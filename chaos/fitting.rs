//! # Cross-validation error estimates
//!
//! A [`FittingAlgorithm`] scores a fitted active set by an estimate of its
//! generalisation error, relative to the variance of the output. The greedy
//! strategy uses this score to decide when to stop adding basis functions.
//!
//! Both estimates work on the factorization already held by the solver, so
//! no refit is needed:
//!
//! - [`CorrectedLeaveOneOut`]: leave-one-out residuals `rᵢ / (1 - hᵢ)` from
//!   the hat diagonal, inflated by the small-sample correction
//!   `T = n/(n-p) · (1 + Σw · tr(G⁻¹)/n)`.
//! - [`KFold`]: fold residuals `(I - H_FF)⁻¹ r_F`, with observation `i` in
//!   fold `i mod k`.
//!
//! Weighted residuals are used throughout, so an observation with zero
//! weight never influences the score.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::Solve;
use std::fmt;
use thiserror::Error;

use crate::least_squares::{LeastSquaresError, LeastSquaresMethod};

/// Leverages this close to one make a leave-one-out residual meaningless.
const LEVERAGE_TOLERANCE: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum FittingError {
    #[error("K-fold cross-validation needs at least 2 folds, got {0}.")]
    TooFewFolds(usize),

    #[error("{folds} folds were requested for only {sample_size} observations.")]
    TooManyFolds { folds: usize, sample_size: usize },

    #[error("Got {found} coefficients for an active set of size {expected}.")]
    CoefficientLength { expected: usize, found: usize },

    #[error(transparent)]
    LeastSquares(#[from] LeastSquaresError),
}

/// Generalisation error estimate of a fitted active set.
pub trait FittingAlgorithm: fmt::Debug + Send + Sync {
    /// Checks that the estimate is defined for a sample of this size.
    fn check(&self, sample_size: usize) -> Result<(), FittingError> {
        let _ = sample_size;
        Ok(())
    }

    /// Relative error of `coefficients` (in the solver's factorization
    /// order) as a fit of `y`. `+∞` flags a fit that cannot be scored.
    fn error(
        &self,
        solver: &LeastSquaresMethod,
        y: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
    ) -> Result<f64, FittingError>;
}

/// Leave-one-out error with the small-sample correction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrectedLeaveOneOut;

impl FittingAlgorithm for CorrectedLeaveOneOut {
    fn error(
        &self,
        solver: &LeastSquaresMethod,
        y: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
    ) -> Result<f64, FittingError> {
        let n = solver.sample_size();
        let p = solver.active_ranks().len();
        if p >= n {
            return Ok(f64::INFINITY);
        }
        let residual = weighted_residual(solver, y, coefficients)?;
        let leverage = solver.hat_diagonal()?;
        if leverage.iter().any(|&h| !(h < 1.0 - LEVERAGE_TOLERANCE)) {
            return Ok(f64::INFINITY);
        }
        let sqrt_weights = solver.sqrt_weights();
        let total_weight = sqrt_weights.dot(&sqrt_weights);
        let press = residual
            .iter()
            .zip(leverage.iter())
            .map(|(r, h)| (r / (1.0 - h)).powi(2))
            .sum::<f64>()
            / total_weight;

        let size = n as f64;
        let correction =
            size / (size - p as f64) * (1.0 + total_weight * solver.gram_inverse_trace()? / size);
        Ok(relative_to_variance(press, y, sqrt_weights) * correction)
    }
}

/// K-fold cross-validation with round-robin fold assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KFold {
    folds: usize,
}

impl KFold {
    pub fn new(folds: usize) -> Result<Self, FittingError> {
        if folds < 2 {
            return Err(FittingError::TooFewFolds(folds));
        }
        Ok(Self { folds })
    }

    pub fn folds(&self) -> usize {
        self.folds
    }
}

impl FittingAlgorithm for KFold {
    fn check(&self, sample_size: usize) -> Result<(), FittingError> {
        if self.folds > sample_size {
            return Err(FittingError::TooManyFolds {
                folds: self.folds,
                sample_size,
            });
        }
        Ok(())
    }

    fn error(
        &self,
        solver: &LeastSquaresMethod,
        y: ArrayView1<f64>,
        coefficients: ArrayView1<f64>,
    ) -> Result<f64, FittingError> {
        let n = solver.sample_size();
        self.check(n)?;
        let p = solver.active_ranks().len();
        let residual = weighted_residual(solver, y, coefficients)?;
        let design = solver.compute_weighted_design();
        let gram_inverse = solver.gram_inverse()?;

        let mut press = 0.0;
        for fold in 0..self.folds {
            let members: Vec<usize> = (fold..n).step_by(self.folds).collect();
            if n - members.len() < p {
                return Ok(f64::INFINITY);
            }
            let block = design.select(Axis(0), &members);
            let system: Array2<f64> =
                Array2::eye(members.len()) - block.dot(&gram_inverse).dot(&block.t());
            match system.solve(&residual.select(Axis(0), &members)) {
                Ok(fold_residual) if fold_residual.iter().all(|v| v.is_finite()) => {
                    press += fold_residual.dot(&fold_residual);
                }
                _ => return Ok(f64::INFINITY),
            }
        }
        let sqrt_weights = solver.sqrt_weights();
        let total_weight = sqrt_weights.dot(&sqrt_weights);
        Ok(relative_to_variance(press / total_weight, y, sqrt_weights))
    }
}

/// `√w ∘ (y - Ψc)`.
fn weighted_residual(
    solver: &LeastSquaresMethod,
    y: ArrayView1<f64>,
    coefficients: ArrayView1<f64>,
) -> Result<Array1<f64>, FittingError> {
    if y.len() != solver.sample_size() {
        return Err(LeastSquaresError::RightHandSideLength {
            expected: solver.sample_size(),
            found: y.len(),
        }
        .into());
    }
    if coefficients.len() != solver.active_ranks().len() {
        return Err(FittingError::CoefficientLength {
            expected: solver.active_ranks().len(),
            found: coefficients.len(),
        });
    }
    Ok((&y - &solver.fitted_values(coefficients)) * &solver.sqrt_weights())
}

// A constant output has nothing to normalise by; the mean square is returned as is.
fn relative_to_variance(mean_square: f64, y: ArrayView1<f64>, sqrt_weights: ArrayView1<f64>) -> f64 {
    let weights = sqrt_weights.mapv(|s| s * s);
    let total = weights.sum();
    let mean = weights.dot(&y) / total;
    let variance = weights
        .iter()
        .zip(y.iter())
        .map(|(w, v)| w * (v - mean).powi(2))
        .sum::<f64>()
        / total;
    if variance > 0.0 {
        mean_square / variance
    } else {
        mean_square
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{OrthogonalBasis, OrthogonalProductBasis, PolynomialFamily};
    use crate::config::DecompositionMethod;
    use crate::design::DesignProxy;
    use crate::enumerate::EnumerateFunction;
    use approx::assert_relative_eq;
    use ndarray::Array;

    const RANKS: [usize; 3] = [0, 1, 2];

    fn points(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| -0.95 + 1.9 * i as f64 / (n - 1) as f64 + 0.03 * (i as f64 * 1.7).sin())
            .collect()
    }

    fn proxy(points: &[f64]) -> DesignProxy {
        let basis = OrthogonalProductBasis::new(
            vec![PolynomialFamily::Legendre],
            EnumerateFunction::linear(1).unwrap(),
        )
        .unwrap();
        let functions = (0..4).map(|r| basis.build(r).unwrap()).collect();
        let sample = Array::from_shape_vec((points.len(), 1), points.to_vec()).unwrap();
        let mut proxy = DesignProxy::new(sample, functions);
        proxy.fill(&[0, 1, 2, 3]).unwrap();
        proxy
    }

    fn target(points: &[f64]) -> Array1<f64> {
        points.iter().map(|&x| (1.3 * x).exp()).collect()
    }

    fn variance(y: &Array1<f64>) -> f64 {
        let mean = y.mean().unwrap();
        y.mapv(|v| (v - mean).powi(2)).mean().unwrap()
    }

    // Refits without each held-out group and returns the mean squared
    // prediction error over all observations.
    fn brute_force(points: &[f64], groups: &[Vec<usize>]) -> f64 {
        let p = proxy(points);
        let y = target(points);
        let n = points.len();
        let mut total = 0.0;
        for group in groups {
            let mut weights = Array1::from_elem(n, 1.0);
            for &i in group {
                weights[i] = 0.0;
            }
            let solver =
                LeastSquaresMethod::new(&p, weights.view(), &RANKS, DecompositionMethod::Qr).unwrap();
            let c = solver.solve(y.view()).unwrap();
            let fitted = solver.fitted_values(c.view());
            total += group.iter().map(|&i| (y[i] - fitted[i]).powi(2)).sum::<f64>();
        }
        total / n as f64
    }

    fn full_fit(points: &[f64]) -> (LeastSquaresMethod, Array1<f64>, Array1<f64>) {
        let p = proxy(points);
        let y = target(points);
        let weights = Array1::from_elem(points.len(), 1.0 / points.len() as f64);
        let solver =
            LeastSquaresMethod::new(&p, weights.view(), &RANKS, DecompositionMethod::Qr).unwrap();
        let c = solver.solve(y.view()).unwrap();
        (solver, y, c)
    }

    #[test]
    fn corrected_loo_matches_refitting() {
        let pts = points(14);
        let n = pts.len();
        let (solver, y, c) = full_fit(&pts);
        let singletons: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();
        let loo = brute_force(&pts, &singletons) / variance(&y);
        let size = n as f64;
        let correction = size / (size - 3.0) * (1.0 + solver.gram_inverse_trace().unwrap() / size);
        let error = CorrectedLeaveOneOut.error(&solver, y.view(), c.view()).unwrap();
        assert_relative_eq!(error, loo * correction, max_relative = 1e-8);
    }

    #[test]
    fn k_fold_matches_refitting() {
        let pts = points(15);
        let (solver, y, c) = full_fit(&pts);
        let folds: Vec<Vec<usize>> = (0..4).map(|f| (f..15).step_by(4).collect()).collect();
        let expected = brute_force(&pts, &folds) / variance(&y);
        let error = KFold::new(4).unwrap().error(&solver, y.view(), c.view()).unwrap();
        assert_relative_eq!(error, expected, max_relative = 1e-8);
    }

    #[test]
    fn exact_fit_scores_near_zero() {
        let pts = points(10);
        let p = proxy(&pts);
        let y: Array1<f64> = pts
            .iter()
            .map(|&x| 0.5 + 2.0 * PolynomialFamily::Legendre.evaluate(2, x))
            .collect();
        let weights = Array1::from_elem(pts.len(), 0.1);
        let solver =
            LeastSquaresMethod::new(&p, weights.view(), &RANKS, DecompositionMethod::Svd).unwrap();
        let c = solver.solve(y.view()).unwrap();
        assert!(CorrectedLeaveOneOut.error(&solver, y.view(), c.view()).unwrap() < 1e-20);
        assert!(KFold::new(5).unwrap().error(&solver, y.view(), c.view()).unwrap() < 1e-20);
    }

    #[test]
    fn saturated_fit_cannot_be_scored() {
        let pts = [-0.8, 0.1, 0.6];
        let p = proxy(&pts);
        let y = target(&pts);
        let weights = Array1::from_elem(3, 1.0 / 3.0);
        let solver =
            LeastSquaresMethod::new(&p, weights.view(), &RANKS, DecompositionMethod::Qr).unwrap();
        let c = solver.solve(y.view()).unwrap();
        assert_eq!(
            CorrectedLeaveOneOut.error(&solver, y.view(), c.view()).unwrap(),
            f64::INFINITY
        );
        assert_eq!(
            KFold::new(3).unwrap().error(&solver, y.view(), c.view()).unwrap(),
            f64::INFINITY
        );
    }

    #[test]
    fn fold_count_is_validated() {
        assert!(matches!(KFold::new(1), Err(FittingError::TooFewFolds(1))));
        let (solver, y, c) = full_fit(&points(6));
        assert!(matches!(
            KFold::new(7).unwrap().error(&solver, y.view(), c.view()),
            Err(FittingError::TooManyFolds {
                folds: 7,
                sample_size: 6
            })
        ));
        assert!(matches!(
            CorrectedLeaveOneOut.error(&solver, y.view(), c.slice(ndarray::s![..2])),
            Err(FittingError::CoefficientLength { expected: 3, found: 2 })
        ));
    }
}
