//! # Weighted least squares with incremental updates
//!
//! Solves `min_c Σᵢ wᵢ (Σⱼ cⱼ φⱼ(xᵢ) - yᵢ)²` over an active set of basis
//! ranks. With `A = diag(√w) Ψ[:, active]`, this is the ordinary least
//! squares problem `min ‖A c - √w ∘ y‖`.
//!
//! Three factorizations are offered:
//!
//! - `Qr`: thin `A = QR`. Columns are appended by Gram–Schmidt (applied
//!   twice) and removed with Givens rotations on `R`, with the same rotations
//!   applied to `Q`.
//! - `Cholesky`: `AᵀA = LLᵀ`. Columns are appended as one more row of `L`.
//!   They are removed with Givens rotations on `Lᵀ`.
//! - `Svd`: `A = UΣVᵀ`. This has no cheap update, so every update
//!   refactorizes the modified design.
//!
//! Rank deficiency is reported, never regularised away. Coefficients are kept
//! in factorization order, which is the order ranks entered the active set
//! ([`LeastSquaresMethod::active_ranks`]).

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Cholesky, Diag, QR, SVD, SolveTriangular, UPLO};
use thiserror::Error;

use crate::config::DecompositionMethod;
use crate::design::{DesignError, DesignProxy};

/// Relative size below which a pivot or singular value counts as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Pivot tolerance when working on the normal matrix, whose rounding error
/// sits at the square root of machine precision relative to the design.
const CHOLESKY_TOLERANCE: f64 = 1e-7;

#[derive(Error, Debug)]
pub enum LeastSquaresError {
    #[error("Least-squares numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Linear algebra backend failed: {0}")]
    Linalg(#[from] LinalgError),

    #[error(transparent)]
    Design(#[from] DesignError),

    #[error("The active set must contain at least one basis rank.")]
    EmptyActiveSet,

    #[error("Basis rank {0} appears more than once in the active set.")]
    DuplicateRank(usize),

    #[error("Weight vector has length {found}, expected {expected}.")]
    WeightLength { expected: usize, found: usize },

    #[error("Weight at index {index} is {value}; weights must be finite and non-negative.")]
    InvalidWeight { index: usize, value: f64 },

    #[error("Right-hand side has length {found}, expected {expected}.")]
    RightHandSideLength { expected: usize, found: usize },

    #[error("Update does not match the current active set: {0}")]
    InconsistentUpdate(String),
}

#[derive(Debug, Clone)]
enum Factorization {
    Qr {
        q: Array2<f64>,
        r: Array2<f64>,
    },
    Svd {
        u: Array2<f64>,
        singular_values: Array1<f64>,
        vt: Array2<f64>,
    },
    Cholesky {
        lower: Array2<f64>,
    },
}

/// A factorized weighted least-squares problem over an active set.
#[derive(Debug, Clone)]
pub struct LeastSquaresMethod {
    method: DecompositionMethod,
    sqrt_weights: Array1<f64>,
    ranks: Vec<usize>,
    /// Unweighted `Ψ[:, ranks]`, columns in factorization order.
    basis_design: Array2<f64>,
    factorization: Factorization,
}

impl LeastSquaresMethod {
    /// Factorizes the weighted design over `ranks`. Every rank must already
    /// be cached in `proxy`.
    pub fn new(
        proxy: &DesignProxy,
        weights: ArrayView1<f64>,
        ranks: &[usize],
        method: DecompositionMethod,
    ) -> Result<Self, LeastSquaresError> {
        if ranks.is_empty() {
            return Err(LeastSquaresError::EmptyActiveSet);
        }
        if let Some(rank) = first_duplicate(ranks) {
            return Err(LeastSquaresError::DuplicateRank(rank));
        }
        if weights.len() != proxy.sample_size() {
            return Err(LeastSquaresError::WeightLength {
                expected: proxy.sample_size(),
                found: weights.len(),
            });
        }
        if let Some((index, &value)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
        {
            return Err(LeastSquaresError::InvalidWeight { index, value });
        }

        let mut basis_design = Array2::<f64>::zeros((proxy.sample_size(), ranks.len()));
        for (j, &rank) in ranks.iter().enumerate() {
            basis_design.column_mut(j).assign(&proxy.column(rank)?);
        }
        let sqrt_weights = weights.mapv(f64::sqrt);
        let weighted = scale_rows(basis_design.view(), &sqrt_weights);
        let factorization = factorize(method, &weighted)?;
        Ok(Self {
            method,
            sqrt_weights,
            ranks: ranks.to_vec(),
            basis_design,
            factorization,
        })
    }

    pub fn method(&self) -> DecompositionMethod {
        self.method
    }

    /// Active ranks in factorization order; [`solve`](Self::solve) returns
    /// coefficients in this order.
    pub fn active_ranks(&self) -> &[usize] {
        &self.ranks
    }

    pub fn sample_size(&self) -> usize {
        self.basis_design.nrows()
    }

    pub fn sqrt_weights(&self) -> ArrayView1<'_, f64> {
        self.sqrt_weights.view()
    }

    /// `diag(√w) Ψ[:, active]`.
    pub fn compute_weighted_design(&self) -> Array2<f64> {
        scale_rows(self.basis_design.view(), &self.sqrt_weights)
    }

    /// `Ψ[:, active] c`, the unweighted fitted values.
    pub fn fitted_values(&self, coefficients: ArrayView1<f64>) -> Array1<f64> {
        self.basis_design.dot(&coefficients)
    }

    pub fn solve(&self, y: ArrayView1<f64>) -> Result<Array1<f64>, LeastSquaresError> {
        if y.len() != self.sample_size() {
            return Err(LeastSquaresError::RightHandSideLength {
                expected: self.sample_size(),
                found: y.len(),
            });
        }
        let b = &y * &self.sqrt_weights;
        let coefficients = match &self.factorization {
            Factorization::Qr { q, r } => {
                r.solve_triangular(UPLO::Upper, Diag::NonUnit, &q.t().dot(&b))?
            }
            Factorization::Svd {
                u,
                singular_values,
                vt,
            } => vt.t().dot(&(u.t().dot(&b) / singular_values)),
            Factorization::Cholesky { lower } => {
                let rhs = self.compute_weighted_design().t().dot(&b);
                let z = lower.solve_triangular(UPLO::Lower, Diag::NonUnit, &rhs)?;
                lower.t().solve_triangular(UPLO::Upper, Diag::NonUnit, &z)?
            }
        };
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(LeastSquaresError::NumericalFailure(
                "solution contains non-finite coefficients".to_string(),
            ));
        }
        Ok(coefficients)
    }

    /// Changes the active set to `kept ∪ added`. `kept` and `removed` must
    /// partition the current active set and `added` must be new. On error
    /// the solver is left as it was.
    pub fn update(
        &mut self,
        proxy: &DesignProxy,
        added: &[usize],
        kept: &[usize],
        removed: &[usize],
    ) -> Result<(), LeastSquaresError> {
        let mut current = self.ranks.clone();
        current.sort_unstable();
        let mut partition: Vec<usize> = kept.iter().chain(removed).copied().collect();
        partition.sort_unstable();
        if partition != current {
            return Err(LeastSquaresError::InconsistentUpdate(format!(
                "kept {:?} and removed {:?} do not partition the active set {:?}",
                kept, removed, current
            )));
        }
        if let Some(&rank) = added.iter().find(|&&r| current.contains(&r)) {
            return Err(LeastSquaresError::InconsistentUpdate(format!(
                "rank {rank} is already active"
            )));
        }
        if let Some(rank) = first_duplicate(added) {
            return Err(LeastSquaresError::DuplicateRank(rank));
        }
        if kept.is_empty() && added.is_empty() {
            return Err(LeastSquaresError::EmptyActiveSet);
        }

        // Appending first keeps the factorization non-empty throughout.
        let mut next = self.clone();
        for &rank in added {
            next.append_column(rank, proxy.column(rank)?)?;
        }
        for &rank in removed {
            if let Some(position) = next.ranks.iter().position(|&r| r == rank) {
                next.remove_column(position);
            }
        }
        if next.method == DecompositionMethod::Svd {
            next.factorization = factorize(next.method, &next.compute_weighted_design())?;
        }
        *self = next;
        Ok(())
    }

    /// Diagonal of the hat matrix `A (AᵀA)⁻¹ Aᵀ`.
    pub fn hat_diagonal(&self) -> Result<Array1<f64>, LeastSquaresError> {
        Ok(match &self.factorization {
            Factorization::Qr { q, .. } => q.map_axis(Axis(1), |row| row.dot(&row)),
            Factorization::Svd { u, .. } => u.map_axis(Axis(1), |row| row.dot(&row)),
            Factorization::Cholesky { lower } => {
                let design = self.compute_weighted_design();
                let projected = lower.solve_triangular(UPLO::Lower, Diag::NonUnit, &design.t().to_owned())?;
                projected.map_axis(Axis(0), |col| col.dot(&col))
            }
        })
    }

    /// `(AᵀA)⁻¹`, in factorization order.
    pub fn gram_inverse(&self) -> Result<Array2<f64>, LeastSquaresError> {
        let p = self.ranks.len();
        let identity = Array2::<f64>::eye(p);
        Ok(match &self.factorization {
            Factorization::Qr { r, .. } => {
                let r_inv = r.solve_triangular(UPLO::Upper, Diag::NonUnit, &identity)?;
                r_inv.dot(&r_inv.t())
            }
            Factorization::Svd {
                singular_values,
                vt,
                ..
            } => {
                let squared = singular_values.mapv(|s| s * s);
                let scaled = &vt.t() / &squared;
                scaled.dot(vt)
            }
            Factorization::Cholesky { lower } => {
                let l_inv = lower.solve_triangular(UPLO::Lower, Diag::NonUnit, &identity)?;
                l_inv.t().dot(&l_inv)
            }
        })
    }

    pub fn gram_inverse_trace(&self) -> Result<f64, LeastSquaresError> {
        Ok(self.gram_inverse()?.diag().sum())
    }

    fn append_column(&mut self, rank: usize, column: ArrayView1<f64>) -> Result<(), LeastSquaresError> {
        let a = &column * &self.sqrt_weights;
        let a_norm = a.dot(&a).sqrt();
        let dependent = || {
            LeastSquaresError::NumericalFailure(format!(
                "basis rank {rank} is linearly dependent on the active set"
            ))
        };
        match &mut self.factorization {
            Factorization::Qr { q, r } => {
                let (n, p) = q.dim();
                if p + 1 > n {
                    return Err(underdetermined(n, p + 1));
                }
                let mut coefficients = q.t().dot(&a);
                let mut residual = &a - &q.dot(&coefficients);
                let correction = q.t().dot(&residual);
                residual -= &q.dot(&correction);
                coefficients += &correction;
                let norm = residual.dot(&residual).sqrt();
                if !(norm > RANK_TOLERANCE * a_norm) {
                    return Err(dependent());
                }
                let mut q_next = Array2::<f64>::zeros((n, p + 1));
                q_next.slice_mut(s![.., ..p]).assign(q);
                q_next.column_mut(p).assign(&(residual / norm));
                let mut r_next = Array2::<f64>::zeros((p + 1, p + 1));
                r_next.slice_mut(s![..p, ..p]).assign(r);
                r_next.slice_mut(s![..p, p]).assign(&coefficients);
                r_next[[p, p]] = norm;
                *q = q_next;
                *r = r_next;
            }
            Factorization::Cholesky { lower } => {
                let weighted = scale_rows(self.basis_design.view(), &self.sqrt_weights);
                let cross = weighted.t().dot(&a);
                let row = lower.solve_triangular(UPLO::Lower, Diag::NonUnit, &cross)?;
                let pivot_sq = a.dot(&a) - row.dot(&row);
                if !(pivot_sq > (CHOLESKY_TOLERANCE * a_norm).powi(2)) {
                    return Err(dependent());
                }
                let p = lower.nrows();
                let mut l_next = Array2::<f64>::zeros((p + 1, p + 1));
                l_next.slice_mut(s![..p, ..p]).assign(lower);
                l_next.slice_mut(s![p, ..p]).assign(&row);
                l_next[[p, p]] = pivot_sq.sqrt();
                *lower = l_next;
            }
            Factorization::Svd { .. } => {}
        }
        let (n, p) = self.basis_design.dim();
        let mut design = Array2::<f64>::zeros((n, p + 1));
        design.slice_mut(s![.., ..p]).assign(&self.basis_design);
        design.column_mut(p).assign(&column);
        self.basis_design = design;
        self.ranks.push(rank);
        Ok(())
    }

    fn remove_column(&mut self, position: usize) {
        match &mut self.factorization {
            Factorization::Qr { q, r } => {
                let reduced = delete_column(r, Some(&mut *q), position);
                *q = q.slice(s![.., ..reduced.nrows()]).to_owned();
                *r = reduced;
            }
            Factorization::Cholesky { lower } => {
                let upper = lower.t().to_owned();
                *lower = delete_column(&upper, None, position).t().to_owned();
            }
            Factorization::Svd { .. } => {}
        }
        self.basis_design = drop_column(&self.basis_design, position);
        self.ranks.remove(position);
    }
}

fn first_duplicate(ranks: &[usize]) -> Option<usize> {
    ranks
        .iter()
        .enumerate()
        .find(|(i, r)| ranks[..*i].contains(*r))
        .map(|(_, &r)| r)
}

fn scale_rows(design: ArrayView2<f64>, scale: &Array1<f64>) -> Array2<f64> {
    &design * &scale.view().insert_axis(Axis(1))
}

fn underdetermined(rows: usize, cols: usize) -> LeastSquaresError {
    LeastSquaresError::NumericalFailure(format!(
        "{rows} observations cannot determine {cols} coefficients"
    ))
}

fn factorize(method: DecompositionMethod, a: &Array2<f64>) -> Result<Factorization, LeastSquaresError> {
    let (n, p) = a.dim();
    if n < p {
        return Err(underdetermined(n, p));
    }
    match method {
        DecompositionMethod::Qr => {
            let (q, r) = a.qr()?;
            check_pivots(r.diag(), RANK_TOLERANCE)?;
            Ok(Factorization::Qr { q, r })
        }
        DecompositionMethod::Svd => {
            let (u, singular_values, vt) = a.svd(true, true)?;
            let (u, vt) = match (u, vt) {
                (Some(u), Some(vt)) => (u, vt),
                _ => {
                    return Err(LeastSquaresError::NumericalFailure(
                        "SVD did not return singular vectors".to_string(),
                    ));
                }
            };
            check_pivots(singular_values.view(), RANK_TOLERANCE)?;
            Ok(Factorization::Svd {
                u: u.slice(s![.., ..p]).to_owned(),
                singular_values,
                vt,
            })
        }
        DecompositionMethod::Cholesky => {
            let gram = a.t().dot(a);
            let lower = gram.cholesky(UPLO::Lower).map_err(|e| {
                LeastSquaresError::NumericalFailure(format!(
                    "normal matrix is not positive definite ({e})"
                ))
            })?;
            check_pivots(lower.diag(), CHOLESKY_TOLERANCE)?;
            Ok(Factorization::Cholesky { lower })
        }
    }
}

fn check_pivots(pivots: ArrayView1<f64>, tolerance: f64) -> Result<(), LeastSquaresError> {
    let largest = pivots.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let smallest = pivots.iter().fold(f64::INFINITY, |m, v| m.min(v.abs()));
    if !(largest > 0.0 && smallest > tolerance * largest) {
        return Err(LeastSquaresError::NumericalFailure(format!(
            "design matrix is rank deficient (pivot ratio {:.3e})",
            if largest > 0.0 { smallest / largest } else { 0.0 }
        )));
    }
    Ok(())
}

fn drop_column(matrix: &Array2<f64>, position: usize) -> Array2<f64> {
    let keep: Vec<usize> = (0..matrix.ncols()).filter(|&j| j != position).collect();
    matrix.select(Axis(1), &keep)
}

// Removes column `k` of the square upper-triangular `r` and restores the
// triangle with Givens rotations on consecutive rows. The rotations are
// mirrored on the columns of `q`, whose trailing column becomes unused.
fn delete_column(r: &Array2<f64>, mut q: Option<&mut Array2<f64>>, k: usize) -> Array2<f64> {
    let p = r.ncols();
    let mut h = drop_column(r, k);
    for j in k..p - 1 {
        let a = h[[j, j]];
        let b = h[[j + 1, j]];
        let rho = a.hypot(b);
        if rho == 0.0 {
            continue;
        }
        let (c, s) = (a / rho, b / rho);
        for col in j..p - 1 {
            let top = h[[j, col]];
            let bottom = h[[j + 1, col]];
            h[[j, col]] = c * top + s * bottom;
            h[[j + 1, col]] = -s * top + c * bottom;
        }
        if let Some(q) = q.as_deref_mut() {
            for row in 0..q.nrows() {
                let left = q[[row, j]];
                let right = q[[row, j + 1]];
                q[[row, j]] = c * left + s * right;
                q[[row, j + 1]] = -s * left + c * right;
            }
        }
    }
    h.slice(s![..p - 1, ..]).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{OrthogonalBasis, OrthogonalProductBasis, PolynomialFamily};
    use crate::enumerate::EnumerateFunction;
    use approx::assert_relative_eq;
    use ndarray::Array;

    const METHODS: [DecompositionMethod; 3] = [
        DecompositionMethod::Qr,
        DecompositionMethod::Svd,
        DecompositionMethod::Cholesky,
    ];

    fn proxy(points: &[f64], size: usize) -> DesignProxy {
        let basis = OrthogonalProductBasis::new(
            vec![PolynomialFamily::Legendre],
            EnumerateFunction::linear(1).unwrap(),
        )
        .unwrap();
        let functions = (0..size).map(|r| basis.build(r).unwrap()).collect();
        let sample = Array::from_shape_vec((points.len(), 1), points.to_vec()).unwrap();
        let mut proxy = DesignProxy::new(sample, functions);
        proxy.fill(&(0..size).collect::<Vec<_>>()).unwrap();
        proxy
    }

    fn grid(n: usize) -> Vec<f64> {
        (0..n).map(|i| -1.0 + 2.0 * i as f64 / (n - 1) as f64).collect()
    }

    #[test]
    fn recovers_exact_polynomial_with_every_method() {
        let points = grid(12);
        let p = proxy(&points, 5);
        let y: Array1<f64> = points
            .iter()
            .map(|&x| 1.5 - 0.5 * PolynomialFamily::Legendre.evaluate(3, x))
            .collect();
        let weights = Array1::from_elem(points.len(), 1.0 / points.len() as f64);
        for method in METHODS {
            let solver = LeastSquaresMethod::new(&p, weights.view(), &[0, 1, 2, 3], method).unwrap();
            let c = solver.solve(y.view()).unwrap();
            assert_relative_eq!(c[0], 1.5, epsilon = 1e-10);
            assert_relative_eq!(c[1], 0.0, epsilon = 1e-10);
            assert_relative_eq!(c[3], -0.5, epsilon = 1e-10);
        }
    }

    #[test]
    fn weights_change_the_fit() {
        let points = [-1.0, 0.0, 1.0];
        let p = proxy(&points, 1);
        let y = Array1::from(vec![0.0, 0.0, 3.0]);
        let weights = Array1::from(vec![1.0, 1.0, 4.0]);
        let solver = LeastSquaresMethod::new(&p, weights.view(), &[0], DecompositionMethod::Qr).unwrap();
        // Weighted mean: (4 * 3) / 6.
        assert_relative_eq!(solver.solve(y.view()).unwrap()[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn update_matches_fresh_factorization() {
        let points = grid(20);
        let p = proxy(&points, 6);
        let y: Array1<f64> = points.iter().map(|&x| (2.0 * x).sin() + x * x).collect();
        let weights = Array1::from_elem(points.len(), 0.05);
        for method in METHODS {
            let mut solver = LeastSquaresMethod::new(&p, weights.view(), &[0, 2], method).unwrap();
            solver.update(&p, &[5, 1], &[0, 2], &[]).unwrap();
            solver.update(&p, &[3], &[0, 5, 1], &[2]).unwrap();
            assert_eq!(solver.active_ranks(), &[0, 5, 1, 3]);
            let fresh = LeastSquaresMethod::new(&p, weights.view(), &[0, 5, 1, 3], method).unwrap();
            let a = solver.solve(y.view()).unwrap();
            let b = fresh.solve(y.view()).unwrap();
            for (x, z) in a.iter().zip(b.iter()) {
                assert_relative_eq!(x, z, epsilon = 1e-10);
            }
            assert_relative_eq!(
                solver.gram_inverse_trace().unwrap(),
                fresh.gram_inverse_trace().unwrap(),
                max_relative = 1e-9
            );
        }
    }

    #[test]
    fn hat_diagonal_traces_to_active_size() {
        let points = grid(15);
        let p = proxy(&points, 4);
        let weights = Array1::from_elem(points.len(), 1.0 / 15.0);
        for method in METHODS {
            let solver = LeastSquaresMethod::new(&p, weights.view(), &[0, 1, 3], method).unwrap();
            let h = solver.hat_diagonal().unwrap();
            assert_relative_eq!(h.sum(), 3.0, epsilon = 1e-10);
            assert!(h.iter().all(|&v| (0.0..=1.0 + 1e-12).contains(&v)));
        }
    }

    #[test]
    fn rank_deficiency_is_a_numerical_failure() {
        // Two distinct points cannot support three Legendre columns.
        let points = [-0.5, 0.5, -0.5, 0.5];
        let p = proxy(&points, 3);
        let weights = Array1::from_elem(4, 0.25);
        for method in METHODS {
            let err = LeastSquaresMethod::new(&p, weights.view(), &[0, 1, 2], method).unwrap_err();
            assert!(
                matches!(err, LeastSquaresError::NumericalFailure(_)),
                "{:?}: {}",
                method,
                err
            );
            let mut solver = LeastSquaresMethod::new(&p, weights.view(), &[0, 1], method).unwrap();
            let err = solver.update(&p, &[2], &[0, 1], &[]).unwrap_err();
            assert!(matches!(err, LeastSquaresError::NumericalFailure(_)), "{:?}", method);
            // A failed update leaves the solver usable.
            assert_eq!(solver.active_ranks(), &[0, 1]);
        }
    }

    #[test]
    fn more_columns_than_rows_is_rejected() {
        let p = proxy(&[0.1, 0.7], 3);
        let weights = Array1::from_elem(2, 0.5);
        let err = LeastSquaresMethod::new(&p, weights.view(), &[0, 1, 2], DecompositionMethod::Qr)
            .unwrap_err();
        assert!(matches!(err, LeastSquaresError::NumericalFailure(_)));
    }

    #[test]
    fn inconsistent_updates_are_rejected() {
        let points = grid(10);
        let p = proxy(&points, 4);
        let weights = Array1::from_elem(10, 0.1);
        let mut solver =
            LeastSquaresMethod::new(&p, weights.view(), &[0, 1], DecompositionMethod::Qr).unwrap();
        assert!(matches!(
            solver.update(&p, &[2], &[0], &[]),
            Err(LeastSquaresError::InconsistentUpdate(_))
        ));
        assert!(matches!(
            solver.update(&p, &[1], &[0, 1], &[]),
            Err(LeastSquaresError::InconsistentUpdate(_))
        ));
        assert!(matches!(
            solver.update(&p, &[], &[], &[0, 1]),
            Err(LeastSquaresError::EmptyActiveSet)
        ));
        assert!(matches!(
            LeastSquaresMethod::new(&p, weights.view(), &[1, 1], DecompositionMethod::Qr),
            Err(LeastSquaresError::DuplicateRank(1))
        ));
    }
}
