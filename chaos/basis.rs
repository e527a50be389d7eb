//! # Orthonormal bases
//!
//! A basis supplies one function per rank, orthonormal with respect to its
//! measure: `E[φ_j φ_k] = δ_jk` and `φ_0 ≡ 1`. Two implementations exist:
//!
//! - [`OrthogonalProductBasis`]: tensor products of univariate orthonormal
//!   polynomial families, ordered by an [`EnumerateFunction`]. This is the
//!   basis for which multi-indices, conditional expectations and Sobol
//!   indices make sense.
//! - [`FunctionListBasis`]: a finite list of user-supplied functions, declared
//!   orthonormal under a given measure. It is not a tensor product.
//!
//! All three polynomial families share one orthonormal three-term recurrence,
//! `p̃_{n+1}(x) = ((x - αₙ) p̃ₙ(x) - √βₙ p̃_{n-1}(x)) / √β_{n+1}`, written in
//! terms of the monic recurrence coefficients `(αₙ, βₙ)` of the family. The
//! same coefficients give the Jacobi matrix of the Golub–Welsch quadrature.

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::{Eigh, UPLO};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::distribution::{Distribution, DistributionError, Marginal};
use crate::enumerate::EnumerateFunction;

/// A comprehensive error type for basis construction and evaluation.
#[derive(Error, Debug)]
pub enum BasisError {
    #[error("A basis needs at least one input dimension.")]
    ZeroDimension,

    #[error("The hyperbolic quasi-norm parameter must lie in (0, 1], got {0}.")]
    InvalidQuasiNorm(f64),

    #[error("Multi-index has {found} components but the basis has dimension {expected}.")]
    MultiIndexDimension { expected: usize, found: usize },

    #[error("Multi-index {0:?} is not reachable by the enumerate function.")]
    MultiIndexNotEnumerated(Vec<usize>),

    #[error("Rank {rank} is beyond the {cardinality} functions of this basis.")]
    RankOutOfRange { rank: usize, cardinality: usize },

    #[error("This basis is not a tensor product; {0} is unavailable.")]
    NotTensorProduct(&'static str),

    #[error("A Gauss rule needs at least one node.")]
    NoQuadratureNodes,

    #[error("Eigendecomposition of the Jacobi matrix failed: {0}")]
    LinalgError(#[from] ndarray_linalg::error::LinalgError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

/// Univariate polynomial families, orthonormal under their own measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolynomialFamily {
    /// Orthonormal under `Uniform(-1, 1)`.
    Legendre,
    /// Probabilists' Hermite, orthonormal under `Normal(0, 1)`.
    Hermite,
    /// Orthonormal under `Exponential(1)`.
    Laguerre,
}

impl PolynomialFamily {
    pub fn measure(&self) -> Marginal {
        match self {
            PolynomialFamily::Legendre => Marginal::Uniform {
                lower: -1.0,
                upper: 1.0,
            },
            PolynomialFamily::Hermite => Marginal::Normal { mean: 0.0, std: 1.0 },
            PolynomialFamily::Laguerre => Marginal::Exponential {
                rate: 1.0,
                location: 0.0,
            },
        }
    }

    /// The family whose measure matches the shape of `marginal`.
    pub fn for_marginal(marginal: &Marginal) -> Self {
        match marginal {
            Marginal::Uniform { .. } => PolynomialFamily::Legendre,
            Marginal::Normal { .. } => PolynomialFamily::Hermite,
            Marginal::Exponential { .. } => PolynomialFamily::Laguerre,
        }
    }

    /// Monic recurrence coefficients `(αₙ, βₙ)`.
    fn recurrence(&self, n: usize) -> (f64, f64) {
        let n = n as f64;
        match self {
            PolynomialFamily::Legendre => (0.0, n * n / (4.0 * n * n - 1.0)),
            PolynomialFamily::Hermite => (0.0, n),
            PolynomialFamily::Laguerre => (2.0 * n + 1.0, n * n),
        }
    }

    /// The orthonormal polynomial of the given degree at `x`.
    pub fn evaluate(&self, degree: usize, x: f64) -> f64 {
        let mut previous = 0.0;
        let mut current = 1.0;
        for n in 0..degree {
            let (alpha, beta) = self.recurrence(n);
            let beta_next = self.recurrence(n + 1).1;
            let next = ((x - alpha) * current - beta.sqrt() * previous) / beta_next.sqrt();
            previous = current;
            current = next;
        }
        current
    }

    /// Gauss rule with `nodes` points for this family's measure, via the
    /// eigen decomposition of the Jacobi matrix. Weights sum to one.
    pub fn gauss_quadrature(&self, nodes: usize) -> Result<(Array1<f64>, Array1<f64>), BasisError> {
        if nodes == 0 {
            return Err(BasisError::NoQuadratureNodes);
        }
        let mut jacobi = Array2::<f64>::zeros((nodes, nodes));
        for i in 0..nodes {
            jacobi[[i, i]] = self.recurrence(i).0;
            if i + 1 < nodes {
                let off = self.recurrence(i + 1).1.sqrt();
                jacobi[[i, i + 1]] = off;
                jacobi[[i + 1, i]] = off;
            }
        }
        let (points, vectors) = jacobi.eigh(UPLO::Lower)?;
        let weights = vectors.row(0).mapv(|v| v * v);
        Ok((points, weights))
    }
}

/// Tensor-product Gauss rule. Rows of the returned sample are the nodes,
/// enumerated with the first dimension varying slowest.
pub fn gauss_product_experiment(
    families: &[PolynomialFamily],
    nodes_per_dimension: &[usize],
) -> Result<(Array2<f64>, Array1<f64>), BasisError> {
    if families.is_empty() {
        return Err(BasisError::ZeroDimension);
    }
    if families.len() != nodes_per_dimension.len() {
        return Err(BasisError::MultiIndexDimension {
            expected: families.len(),
            found: nodes_per_dimension.len(),
        });
    }
    let rules = families
        .iter()
        .zip(nodes_per_dimension)
        .map(|(f, &n)| f.gauss_quadrature(n))
        .collect::<Result<Vec<_>, _>>()?;
    let combos: Vec<Vec<usize>> = rules
        .iter()
        .map(|(points, _)| 0..points.len())
        .multi_cartesian_product()
        .collect();
    let dimension = families.len();
    let mut sample = Array2::<f64>::zeros((combos.len(), dimension));
    let mut weights = Array1::<f64>::ones(combos.len());
    for (row, combo) in combos.iter().enumerate() {
        for (d, &k) in combo.iter().enumerate() {
            sample[[row, d]] = rules[d].0[k];
            weights[row] *= rules[d].1[k];
        }
    }
    Ok((sample, weights))
}

/// Scalar function of a point, used for custom bases.
pub type ScalarFunction = Arc<dyn Fn(ArrayView1<f64>) -> f64 + Send + Sync>;

/// `Π_d p̃_{α_d}(x_d)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductPolynomial {
    families: Arc<[PolynomialFamily]>,
    multi_index: Vec<usize>,
}

impl ProductPolynomial {
    pub fn multi_index(&self) -> &[usize] {
        &self.multi_index
    }

    pub fn evaluate(&self, x: ArrayView1<f64>) -> f64 {
        self.multi_index
            .iter()
            .zip(self.families.iter())
            .enumerate()
            .filter(|(_, (degree, _))| **degree > 0)
            .map(|(d, (&degree, family))| family.evaluate(degree, x[d]))
            .product()
    }
}

/// One evaluable member of a basis.
#[derive(Clone)]
pub enum BasisFunction {
    Product(ProductPolynomial),
    Custom(ScalarFunction),
}

impl BasisFunction {
    pub fn evaluate(&self, x: ArrayView1<f64>) -> f64 {
        match self {
            BasisFunction::Product(p) => p.evaluate(x),
            BasisFunction::Custom(f) => f(x),
        }
    }
}

impl fmt::Debug for BasisFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BasisFunction::Product(p) => f.debug_tuple("Product").field(&p.multi_index).finish(),
            BasisFunction::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// An orthonormal basis, indexed by rank.
pub trait OrthogonalBasis: fmt::Debug + Send + Sync {
    fn dimension(&self) -> usize;

    /// The measure under which the functions are orthonormal.
    fn measure(&self) -> Distribution;

    fn build(&self, rank: usize) -> Result<BasisFunction, BasisError>;

    /// Number of functions, `None` when unbounded.
    fn cardinality(&self) -> Option<usize> {
        None
    }

    fn is_tensor_product(&self) -> bool {
        false
    }

    fn multi_index(&self, rank: usize) -> Result<Vec<usize>, BasisError> {
        let _ = rank;
        Err(BasisError::NotTensorProduct("multi-index enumeration"))
    }

    fn rank_of(&self, multi_index: &[usize]) -> Result<usize, BasisError> {
        let _ = multi_index;
        Err(BasisError::NotTensorProduct("multi-index ranking"))
    }

    /// The basis on the selected input dimensions.
    fn marginal_basis(&self, dims: &[usize]) -> Result<Arc<dyn OrthogonalBasis>, BasisError> {
        let _ = dims;
        Err(BasisError::NotTensorProduct("marginal basis"))
    }
}

/// Tensor-product polynomial basis.
#[derive(Debug, Clone)]
pub struct OrthogonalProductBasis {
    families: Arc<[PolynomialFamily]>,
    enumerate: EnumerateFunction,
    measure: Distribution,
}

impl OrthogonalProductBasis {
    pub fn new(
        families: Vec<PolynomialFamily>,
        enumerate: EnumerateFunction,
    ) -> Result<Self, BasisError> {
        if families.is_empty() {
            return Err(BasisError::ZeroDimension);
        }
        if enumerate.dimension() != families.len() {
            return Err(BasisError::MultiIndexDimension {
                expected: families.len(),
                found: enumerate.dimension(),
            });
        }
        let measure = Distribution::independent(families.iter().map(|f| f.measure()).collect())?;
        Ok(Self {
            families: families.into(),
            enumerate,
            measure,
        })
    }

    /// Standard families matched to each marginal, linear enumeration.
    pub fn for_distribution(distribution: &Distribution) -> Result<Self, BasisError> {
        let families = distribution
            .marginals()
            .iter()
            .map(PolynomialFamily::for_marginal)
            .collect::<Vec<_>>();
        let enumerate = EnumerateFunction::linear(families.len())?;
        Self::new(families, enumerate)
    }

    pub fn families(&self) -> &[PolynomialFamily] {
        &self.families
    }

    pub fn enumerate_function(&self) -> &EnumerateFunction {
        &self.enumerate
    }
}

impl OrthogonalBasis for OrthogonalProductBasis {
    fn dimension(&self) -> usize {
        self.families.len()
    }

    fn measure(&self) -> Distribution {
        self.measure.clone()
    }

    fn build(&self, rank: usize) -> Result<BasisFunction, BasisError> {
        Ok(BasisFunction::Product(ProductPolynomial {
            families: Arc::clone(&self.families),
            multi_index: self.enumerate.multi_index(rank),
        }))
    }

    fn is_tensor_product(&self) -> bool {
        true
    }

    fn multi_index(&self, rank: usize) -> Result<Vec<usize>, BasisError> {
        Ok(self.enumerate.multi_index(rank))
    }

    fn rank_of(&self, multi_index: &[usize]) -> Result<usize, BasisError> {
        self.enumerate.inverse(multi_index)
    }

    fn marginal_basis(&self, dims: &[usize]) -> Result<Arc<dyn OrthogonalBasis>, BasisError> {
        crate::distribution::validate_selection(dims, self.families.len())?;
        let families = dims.iter().map(|&d| self.families[d]).collect();
        let enumerate = self.enumerate.restrict(dims.len())?;
        Ok(Arc::new(Self::new(families, enumerate)?))
    }
}

/// A finite basis of user-supplied functions, orthonormal under `measure`.
pub struct FunctionListBasis {
    measure: Distribution,
    functions: Vec<ScalarFunction>,
}

impl FunctionListBasis {
    pub fn new(measure: Distribution, functions: Vec<ScalarFunction>) -> Self {
        Self { measure, functions }
    }
}

impl fmt::Debug for FunctionListBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionListBasis")
            .field("measure", &self.measure)
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl OrthogonalBasis for FunctionListBasis {
    fn dimension(&self) -> usize {
        self.measure.dimension()
    }

    fn measure(&self) -> Distribution {
        self.measure.clone()
    }

    fn build(&self, rank: usize) -> Result<BasisFunction, BasisError> {
        self.functions
            .get(rank)
            .map(|f| BasisFunction::Custom(Arc::clone(f)))
            .ok_or(BasisError::RankOutOfRange {
                rank,
                cardinality: self.functions.len(),
            })
    }

    fn cardinality(&self) -> Option<usize> {
        Some(self.functions.len())
    }
}
