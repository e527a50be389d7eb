//! # Input distributions and the isoprobabilistic transform
//!
//! A chaos expansion is built on the measure of its basis, not on the
//! distribution of the physical inputs. This module describes the input
//! distribution (independent marginals glued by an independent or Gaussian
//! copula) and the bijection `T` that carries an input point onto the basis
//! measure, so that `surrogate(x) = Σ c_j φ_j(T(x))`.
//!
//! Marginals of the same family are mapped affinely. Everything else goes
//! through the standard normal space, `x ↦ Φ⁻¹(F(x))`, which is also where
//! the Gaussian copula is whitened (Nataf transform).

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, Zip};
use ndarray_linalg::{Cholesky, Diag, SolveTriangular, UPLO};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while describing distributions or mapping between them.
#[derive(Error, Debug)]
pub enum DistributionError {
    #[error("Uniform marginal requires finite bounds with lower < upper, got [{lower}, {upper}].")]
    InvalidUniformBounds { lower: f64, upper: f64 },

    #[error("Normal marginal requires a finite mean and a positive, finite standard deviation (mean {mean}, std {std}).")]
    InvalidNormal { mean: f64, std: f64 },

    #[error("Exponential marginal requires a positive, finite rate and a finite location (rate {rate}, location {location}).")]
    InvalidExponential { rate: f64, location: f64 },

    #[error("A distribution needs at least one marginal.")]
    NoMarginals,

    #[error("Correlation matrix has shape {rows}x{cols} but the distribution has {dimension} marginals.")]
    CorrelationShape {
        rows: usize,
        cols: usize,
        dimension: usize,
    },

    #[error("Correlation matrix must be symmetric with a unit diagonal and entries in [-1, 1].")]
    InvalidCorrelation,

    #[error("Correlation matrix is not positive definite: {0}")]
    CorrelationNotPositiveDefinite(#[from] ndarray_linalg::error::LinalgError),

    #[error("Dimension {index} is out of range for a {dimension}-dimensional distribution.")]
    DimensionOutOfRange { index: usize, dimension: usize },

    #[error("A marginal selection must be non-empty and must not repeat dimensions.")]
    InvalidSelection,

    #[error("Cannot map a {from_dimension}-dimensional distribution onto a {to_dimension}-dimensional one.")]
    DimensionMismatch {
        from_dimension: usize,
        to_dimension: usize,
    },

    #[error("Point has dimension {found}, expected {expected}.")]
    PointDimension { expected: usize, found: usize },
}

/// A univariate distribution. Parameters are validated by [`Marginal::validate`],
/// which every [`Distribution`] constructor calls.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Marginal {
    Uniform {
        lower: f64,
        upper: f64,
    },
    Normal {
        mean: f64,
        std: f64,
    },
    /// Density `λ exp(-λ (x - location))` on `[location, ∞)`.
    Exponential {
        rate: f64,
        #[serde(default)]
        location: f64,
    },
}

impl Marginal {
    pub fn validate(&self) -> Result<(), DistributionError> {
        match *self {
            Marginal::Uniform { lower, upper } => {
                if !(lower.is_finite() && upper.is_finite() && lower < upper) {
                    return Err(DistributionError::InvalidUniformBounds { lower, upper });
                }
            }
            Marginal::Normal { mean, std } => {
                if !(mean.is_finite() && std.is_finite() && std > 0.0) {
                    return Err(DistributionError::InvalidNormal { mean, std });
                }
            }
            Marginal::Exponential { rate, location } => {
                if !(rate.is_finite() && rate > 0.0 && location.is_finite()) {
                    return Err(DistributionError::InvalidExponential { rate, location });
                }
            }
        }
        Ok(())
    }

    pub fn cdf(&self, x: f64) -> f64 {
        match *self {
            Marginal::Uniform { lower, upper } => ((x - lower) / (upper - lower)).clamp(0.0, 1.0),
            Marginal::Normal { mean, std } => special::normal_cdf((x - mean) / std),
            Marginal::Exponential { rate, location } => {
                if x <= location {
                    0.0
                } else {
                    -(-rate * (x - location)).exp_m1()
                }
            }
        }
    }

    /// Inverse CDF. `p` is clamped to `[0, 1]`; the endpoints map to the
    /// support bounds, which may be infinite.
    pub fn quantile(&self, p: f64) -> f64 {
        let p = p.clamp(0.0, 1.0);
        match *self {
            Marginal::Uniform { lower, upper } => lower + p * (upper - lower),
            Marginal::Normal { mean, std } => {
                if p == 0.0 {
                    f64::NEG_INFINITY
                } else if p == 1.0 {
                    f64::INFINITY
                } else {
                    mean + std * special::normal_quantile(p)
                }
            }
            Marginal::Exponential { rate, location } => location - (-p).ln_1p() / rate,
        }
    }

    pub fn pdf(&self, x: f64) -> f64 {
        match *self {
            Marginal::Uniform { lower, upper } => {
                if (lower..=upper).contains(&x) {
                    1.0 / (upper - lower)
                } else {
                    0.0
                }
            }
            Marginal::Normal { mean, std } => {
                let z = (x - mean) / std;
                (-0.5 * z * z).exp() / (std * (2.0 * std::f64::consts::PI).sqrt())
            }
            Marginal::Exponential { rate, location } => {
                if x < location {
                    0.0
                } else {
                    rate * (-rate * (x - location)).exp()
                }
            }
        }
    }

    pub fn mean(&self) -> f64 {
        match *self {
            Marginal::Uniform { lower, upper } => 0.5 * (lower + upper),
            Marginal::Normal { mean, .. } => mean,
            Marginal::Exponential { rate, location } => location + 1.0 / rate,
        }
    }

    pub fn standard_deviation(&self) -> f64 {
        match *self {
            Marginal::Uniform { lower, upper } => (upper - lower) / 12f64.sqrt(),
            Marginal::Normal { std, .. } => std,
            Marginal::Exponential { rate, .. } => 1.0 / rate,
        }
    }

    /// `Φ⁻¹(F(x))`, computed in closed form where the family allows it and on
    /// the smaller tail otherwise.
    fn to_standard_normal(&self, x: f64) -> f64 {
        match *self {
            Marginal::Normal { mean, std } => (x - mean) / std,
            Marginal::Uniform { .. } => special::normal_quantile(clamp_probability(self.cdf(x))),
            Marginal::Exponential { rate, location } => {
                let t = (rate * (x - location)).max(0.0);
                let survival = (-t).exp();
                if survival < 0.5 {
                    -special::normal_quantile(clamp_probability(survival))
                } else {
                    special::normal_quantile(clamp_probability(-(-t).exp_m1()))
                }
            }
        }
    }

    /// `F⁻¹(Φ(z))`.
    fn from_standard_normal(&self, z: f64) -> f64 {
        match *self {
            Marginal::Normal { mean, std } => mean + std * z,
            Marginal::Uniform { lower, upper } => lower + (upper - lower) * special::normal_cdf(z),
            Marginal::Exponential { rate, location } => {
                if z > 0.0 {
                    location - special::normal_cdf(-z).ln() / rate
                } else {
                    location - (-special::normal_cdf(z)).ln_1p() / rate
                }
            }
        }
    }

    /// The affine map `x ↦ scale·x + shift` carrying `self` onto `target`,
    /// when both belong to the same location-scale family.
    fn affine_map_to(&self, target: &Marginal) -> Option<(f64, f64)> {
        let scale = match (*self, *target) {
            (Marginal::Uniform { lower, upper }, Marginal::Uniform { lower: l, upper: u }) => {
                (u - l) / (upper - lower)
            }
            (Marginal::Normal { std, .. }, Marginal::Normal { std: s, .. }) => s / std,
            (Marginal::Exponential { rate, .. }, Marginal::Exponential { rate: r, .. }) => rate / r,
            _ => return None,
        };
        let anchor = |m: &Marginal| match *m {
            Marginal::Uniform { lower, .. } => lower,
            Marginal::Normal { mean, .. } => mean,
            Marginal::Exponential { location, .. } => location,
        };
        Some((scale, anchor(target) - scale * anchor(self)))
    }
}

fn clamp_probability(p: f64) -> f64 {
    p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON / 2.0)
}

/// Dependence structure between the marginals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Copula {
    #[default]
    Independent,
    /// Gaussian copula with the given correlation matrix (row-major rows).
    Normal { correlation: Vec<Vec<f64>> },
}

/// A joint distribution: marginals plus a copula.
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution {
    marginals: Vec<Marginal>,
    copula: Copula,
    factor: Option<CopulaFactor>,
}

/// Lower Cholesky factor `L` of a Gaussian copula correlation and its inverse.
#[derive(Debug, Clone, PartialEq)]
struct CopulaFactor {
    lower: Array2<f64>,
    inverse: Array2<f64>,
}

impl Distribution {
    pub fn new(marginals: Vec<Marginal>, copula: Copula) -> Result<Self, DistributionError> {
        if marginals.is_empty() {
            return Err(DistributionError::NoMarginals);
        }
        for marginal in &marginals {
            marginal.validate()?;
        }
        let dimension = marginals.len();
        let factor = match &copula {
            Copula::Independent => None,
            Copula::Normal { correlation } => {
                let matrix = correlation_matrix(correlation, dimension)?;
                let lower = matrix.cholesky(UPLO::Lower)?;
                let identity = Array2::<f64>::eye(dimension);
                let inverse = lower.solve_triangular(UPLO::Lower, Diag::NonUnit, &identity)?;
                Some(CopulaFactor { lower, inverse })
            }
        };
        Ok(Self {
            marginals,
            copula,
            factor,
        })
    }

    pub fn independent(marginals: Vec<Marginal>) -> Result<Self, DistributionError> {
        Self::new(marginals, Copula::Independent)
    }

    pub fn dimension(&self) -> usize {
        self.marginals.len()
    }

    pub fn marginals(&self) -> &[Marginal] {
        &self.marginals
    }

    pub fn copula(&self) -> &Copula {
        &self.copula
    }

    /// True for the independent copula, and for a Gaussian copula whose
    /// correlation is the identity.
    pub fn has_independent_copula(&self) -> bool {
        match &self.copula {
            Copula::Independent => true,
            Copula::Normal { correlation } => correlation.iter().enumerate().all(|(i, row)| {
                row.iter()
                    .enumerate()
                    .all(|(j, &r)| if i == j { r == 1.0 } else { r == 0.0 })
            }),
        }
    }

    pub fn mean(&self) -> Array1<f64> {
        self.marginals.iter().map(Marginal::mean).collect()
    }

    /// The joint distribution of the selected components, in the given order.
    pub fn marginal(&self, dims: &[usize]) -> Result<Self, DistributionError> {
        validate_selection(dims, self.dimension())?;
        let marginals = dims.iter().map(|&d| self.marginals[d]).collect();
        let copula = match &self.copula {
            Copula::Independent => Copula::Independent,
            Copula::Normal { correlation } => Copula::Normal {
                correlation: dims
                    .iter()
                    .map(|&i| dims.iter().map(|&j| correlation[i][j]).collect())
                    .collect(),
            },
        };
        Self::new(marginals, copula)
    }
}

fn correlation_matrix(rows: &[Vec<f64>], dimension: usize) -> Result<Array2<f64>, DistributionError> {
    let cols = rows.first().map_or(0, Vec::len);
    if rows.len() != dimension || rows.iter().any(|r| r.len() != dimension) {
        return Err(DistributionError::CorrelationShape {
            rows: rows.len(),
            cols,
            dimension,
        });
    }
    let matrix = Array2::from_shape_fn((dimension, dimension), |(i, j)| rows[i][j]);
    for i in 0..dimension {
        if (matrix[[i, i]] - 1.0).abs() > 1e-12 {
            return Err(DistributionError::InvalidCorrelation);
        }
        for j in 0..i {
            let r = matrix[[i, j]];
            if !r.is_finite() || r.abs() > 1.0 || (r - matrix[[j, i]]).abs() > 1e-12 {
                return Err(DistributionError::InvalidCorrelation);
            }
        }
    }
    Ok(matrix)
}

pub(crate) fn validate_selection(dims: &[usize], dimension: usize) -> Result<(), DistributionError> {
    if dims.is_empty() {
        return Err(DistributionError::InvalidSelection);
    }
    for (k, &d) in dims.iter().enumerate() {
        if d >= dimension {
            return Err(DistributionError::DimensionOutOfRange {
                index: d,
                dimension,
            });
        }
        if dims[..k].contains(&d) {
            return Err(DistributionError::InvalidSelection);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ComponentMap {
    Affine { scale: f64, shift: f64 },
    /// `F_target⁻¹ ∘ F_source` through the standard normal space.
    Quantile,
}

#[derive(Debug, Clone, PartialEq)]
enum TransformPlan {
    Componentwise(Vec<ComponentMap>),
    /// Whiten the source copula in normal space, then colour with the target one.
    Gaussian,
}

/// Bijection carrying samples of `source` onto samples of `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct IsoprobabilisticTransform {
    source: Distribution,
    target: Distribution,
    plan: TransformPlan,
}

impl IsoprobabilisticTransform {
    pub fn new(source: &Distribution, target: &Distribution) -> Result<Self, DistributionError> {
        if source.dimension() != target.dimension() {
            return Err(DistributionError::DimensionMismatch {
                from_dimension: source.dimension(),
                to_dimension: target.dimension(),
            });
        }
        let plan = if source.factor.is_none() && target.factor.is_none() {
            TransformPlan::Componentwise(
                source
                    .marginals
                    .iter()
                    .zip(&target.marginals)
                    .map(|(s, t)| match s.affine_map_to(t) {
                        Some((scale, shift)) => ComponentMap::Affine { scale, shift },
                        None => ComponentMap::Quantile,
                    })
                    .collect(),
            )
        } else {
            TransformPlan::Gaussian
        };
        Ok(Self {
            source: source.clone(),
            target: target.clone(),
            plan,
        })
    }

    pub fn source(&self) -> &Distribution {
        &self.source
    }

    pub fn target(&self) -> &Distribution {
        &self.target
    }

    pub fn dimension(&self) -> usize {
        self.source.dimension()
    }

    pub fn is_identity(&self) -> bool {
        match &self.plan {
            TransformPlan::Componentwise(maps) => maps
                .iter()
                .all(|m| *m == ComponentMap::Affine { scale: 1.0, shift: 0.0 }),
            TransformPlan::Gaussian => false,
        }
    }

    /// The transform from `target` back to `source`.
    pub fn inverse(&self) -> Self {
        let plan = match &self.plan {
            TransformPlan::Componentwise(maps) => TransformPlan::Componentwise(
                maps.iter()
                    .map(|m| match *m {
                        ComponentMap::Affine { scale, shift } => ComponentMap::Affine {
                            scale: 1.0 / scale,
                            shift: -shift / scale,
                        },
                        ComponentMap::Quantile => ComponentMap::Quantile,
                    })
                    .collect(),
            ),
            TransformPlan::Gaussian => TransformPlan::Gaussian,
        };
        Self {
            source: self.target.clone(),
            target: self.source.clone(),
            plan,
        }
    }

    /// The transform between the selected marginals of source and target.
    pub fn marginal(&self, dims: &[usize]) -> Result<Self, DistributionError> {
        Self::new(&self.source.marginal(dims)?, &self.target.marginal(dims)?)
    }

    pub fn apply(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, DistributionError> {
        self.check_dimension(x.len())?;
        let mut out = Array1::zeros(x.len());
        self.map_point(x, out.view_mut());
        Ok(out)
    }

    /// Maps every row of `sample`, in parallel.
    pub fn apply_sample(&self, sample: ArrayView2<f64>) -> Result<Array2<f64>, DistributionError> {
        self.check_dimension(sample.ncols())?;
        let mut out = Array2::zeros(sample.raw_dim());
        Zip::from(out.rows_mut())
            .and(sample.rows())
            .par_for_each(|dst, src| self.map_point(src, dst));
        Ok(out)
    }

    fn check_dimension(&self, found: usize) -> Result<(), DistributionError> {
        if found != self.dimension() {
            return Err(DistributionError::PointDimension {
                expected: self.dimension(),
                found,
            });
        }
        Ok(())
    }

    fn map_point(&self, x: ArrayView1<f64>, mut out: ArrayViewMut1<f64>) {
        let source = &self.source.marginals;
        let target = &self.target.marginals;
        match &self.plan {
            TransformPlan::Componentwise(maps) => {
                for (i, map) in maps.iter().enumerate() {
                    out[i] = match *map {
                        ComponentMap::Affine { scale, shift } => scale * x[i] + shift,
                        ComponentMap::Quantile => {
                            target[i].from_standard_normal(source[i].to_standard_normal(x[i]))
                        }
                    };
                }
            }
            TransformPlan::Gaussian => {
                let mut z: Array1<f64> = x
                    .iter()
                    .zip(source)
                    .map(|(&xi, m)| m.to_standard_normal(xi))
                    .collect();
                if let Some(f) = &self.source.factor {
                    z = f.inverse.dot(&z);
                }
                if let Some(f) = &self.target.factor {
                    z = f.lower.dot(&z);
                }
                for (i, m) in target.iter().enumerate() {
                    out[i] = m.from_standard_normal(z[i]);
                }
            }
        }
    }
}

/// Normal distribution special functions.
mod special {
    use std::f64::consts::{FRAC_1_SQRT_2, PI};

    // Acklam's rational approximation to the normal quantile.
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const TAIL: f64 = 0.02425;

    /// Complementary error function, relative accuracy around `1e-12`.
    ///
    /// Below 2.5 the everywhere-positive series
    /// `erf(x) = 2/√π e^{-x²} Σ 2ⁿ x^{2n+1} / (1·3···(2n+1))` is summed; above
    /// it the Laplace continued fraction is evaluated bottom-up.
    pub(super) fn erfc(x: f64) -> f64 {
        if x.is_nan() {
            return f64::NAN;
        }
        if x < 0.0 {
            return 2.0 - erfc(-x);
        }
        if x < 2.5 {
            let two_x2 = 2.0 * x * x;
            let mut term = x;
            let mut sum = x;
            for n in 1..400 {
                term *= two_x2 / (2 * n + 1) as f64;
                sum += term;
                if term <= 1e-17 * sum {
                    break;
                }
            }
            1.0 - 2.0 / PI.sqrt() * (-x * x).exp() * sum
        } else {
            let mut f = x;
            for k in (1..=120).rev() {
                f = x + (k as f64 / 2.0) / f;
            }
            (-x * x).exp() / PI.sqrt() / f
        }
    }

    pub(super) fn normal_cdf(z: f64) -> f64 {
        0.5 * erfc(-z * FRAC_1_SQRT_2)
    }

    /// Acklam's approximation refined by one Halley step on [`normal_cdf`].
    /// `p` must lie in `(0, 1)`.
    pub(super) fn normal_quantile(p: f64) -> f64 {
        let x = if p < TAIL {
            let q = (-2.0 * p.ln()).sqrt();
            tail(q)
        } else if p <= 1.0 - TAIL {
            let q = p - 0.5;
            let r = q * q;
            (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
                / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
        } else {
            let q = (-2.0 * (-p).ln_1p()).sqrt();
            -tail(q)
        };
        let e = normal_cdf(x) - p;
        let u = e * (2.0 * PI).sqrt() * (0.5 * x * x).exp();
        x - u / (1.0 + 0.5 * x * u)
    }

    fn tail(q: f64) -> f64 {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn normal_cdf_matches_reference_values() {
        assert_relative_eq!(special::normal_cdf(0.0), 0.5, epsilon = 1e-15);
        assert_relative_eq!(special::normal_cdf(1.959963984540054), 0.975, epsilon = 1e-12);
        assert_relative_eq!(special::normal_cdf(-3.0), 1.3498980316300946e-3, max_relative = 1e-10);
        assert_relative_eq!(special::normal_cdf(-8.0), 6.22096057427178e-16, max_relative = 1e-9);
    }

    #[test]
    fn normal_quantile_inverts_cdf() {
        for &p in &[1e-12, 1e-6, 0.01, 0.2, 0.5, 0.8, 0.99, 1.0 - 1e-6] {
            let z = special::normal_quantile(p);
            assert_relative_eq!(special::normal_cdf(z), p, max_relative = 1e-9);
        }
        assert_relative_eq!(special::normal_quantile(0.975), 1.959963984540054, epsilon = 1e-9);
    }

    #[test]
    fn rejects_invalid_marginals() {
        let err = Distribution::independent(vec![Marginal::Uniform { lower: 1.0, upper: 1.0 }]);
        assert!(matches!(err, Err(DistributionError::InvalidUniformBounds { .. })));
        let err = Distribution::independent(vec![Marginal::Normal { mean: 0.0, std: -1.0 }]);
        assert!(matches!(err, Err(DistributionError::InvalidNormal { .. })));
        assert!(matches!(
            Distribution::independent(vec![]),
            Err(DistributionError::NoMarginals)
        ));
    }

    #[test]
    fn marginal_quantile_and_cdf_are_inverse() {
        let marginals = [
            Marginal::Uniform { lower: -2.0, upper: 5.0 },
            Marginal::Normal { mean: 1.0, std: 3.0 },
            Marginal::Exponential { rate: 2.0, location: 0.5 },
        ];
        for m in marginals {
            for &p in &[0.05, 0.3, 0.5, 0.9] {
                assert_relative_eq!(m.cdf(m.quantile(p)), p, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn uniform_to_legendre_measure_is_affine() {
        let source = Distribution::independent(vec![Marginal::Uniform { lower: 0.0, upper: 1.0 }]).unwrap();
        let target = Distribution::independent(vec![Marginal::Uniform { lower: -1.0, upper: 1.0 }]).unwrap();
        let t = IsoprobabilisticTransform::new(&source, &target).unwrap();
        let u = t.apply(array![0.25].view()).unwrap();
        assert_relative_eq!(u[0], -0.5, epsilon = 1e-15);
        let back = t.inverse().apply(u.view()).unwrap();
        assert_relative_eq!(back[0], 0.25, epsilon = 1e-15);
    }

    #[test]
    fn identity_is_detected() {
        let d = Distribution::independent(vec![Marginal::Normal { mean: 0.0, std: 1.0 }; 2]).unwrap();
        assert!(IsoprobabilisticTransform::new(&d, &d).unwrap().is_identity());
    }

    #[test]
    fn quantile_path_round_trips_through_inverse() {
        let source = Distribution::independent(vec![
            Marginal::Exponential { rate: 0.5, location: 1.0 },
            Marginal::Uniform { lower: 2.0, upper: 4.0 },
        ])
        .unwrap();
        let target = Distribution::independent(vec![Marginal::Normal { mean: 0.0, std: 1.0 }; 2]).unwrap();
        let t = IsoprobabilisticTransform::new(&source, &target).unwrap();
        let sample = array![[1.5, 2.1], [3.0, 3.9], [10.0, 3.0]];
        let mapped = t.apply_sample(sample.view()).unwrap();
        // The median of Uniform(2, 4) is 3, which lands on 0.
        assert_relative_eq!(mapped[[2, 1]], 0.0, epsilon = 1e-12);
        let back = t.inverse().apply_sample(mapped.view()).unwrap();
        for (a, b) in back.iter().zip(sample.iter()) {
            assert_relative_eq!(a, b, max_relative = 1e-9);
        }
    }

    #[test]
    fn gaussian_copula_is_whitened() {
        let rho = 0.6;
        let source = Distribution::new(
            vec![Marginal::Normal { mean: 0.0, std: 1.0 }; 2],
            Copula::Normal {
                correlation: vec![vec![1.0, rho], vec![rho, 1.0]],
            },
        )
        .unwrap();
        assert!(!source.has_independent_copula());
        let target = Distribution::independent(vec![Marginal::Normal { mean: 0.0, std: 1.0 }; 2]).unwrap();
        let t = IsoprobabilisticTransform::new(&source, &target).unwrap();
        let w = t.apply(array![1.0, 1.0].view()).unwrap();
        // L = [[1, 0], [rho, sqrt(1 - rho^2)]], w = L^{-1} z.
        assert_relative_eq!(w[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(w[1], (1.0 - rho) / (1.0 - rho * rho).sqrt(), epsilon = 1e-12);
        let back = t.inverse().apply(w.view()).unwrap();
        assert_relative_eq!(back[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(back[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn marginal_selection_validates_dimensions() {
        let d = Distribution::independent(vec![Marginal::Normal { mean: 0.0, std: 1.0 }; 3]).unwrap();
        assert_eq!(d.marginal(&[2, 0]).unwrap().dimension(), 2);
        assert!(matches!(
            d.marginal(&[3]),
            Err(DistributionError::DimensionOutOfRange { index: 3, dimension: 3 })
        ));
        assert!(matches!(d.marginal(&[1, 1]), Err(DistributionError::InvalidSelection)));
        assert!(matches!(d.marginal(&[]), Err(DistributionError::InvalidSelection)));
    }

    #[test]
    fn rejects_non_positive_definite_correlation() {
        let result = Distribution::new(
            vec![Marginal::Normal { mean: 0.0, std: 1.0 }; 2],
            Copula::Normal {
                correlation: vec![vec![1.0, 1.0], vec![1.0, 1.0]],
            },
        );
        assert!(matches!(
            result,
            Err(DistributionError::CorrelationNotPositiveDefinite(_))
        ));
    }
}
