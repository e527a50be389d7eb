//! # Expansion result
//!
//! [`FunctionalChaosResult`] is the immutable outcome of a strategy run. Its
//! surrogate is `x ↦ Σⱼ cⱼ φⱼ(T(x))`, where `T` carries the input
//! distribution onto the measure of the basis. The expansion on measure
//! space is [`ChaosExpansion`]; composed with `T` it becomes the
//! [`ChaosSurrogate`] returned by [`FunctionalChaosResult::meta_model`].

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::Arc;

use crate::basis::{BasisError, BasisFunction, OrthogonalBasis};
use crate::distribution::{validate_selection, Distribution, IsoprobabilisticTransform};
use crate::function::{check_input, map_rows, FunctionError, VectorFunction};
use crate::strategy::{ExpansionError, GreedyTrace};

/// Result of a functional chaos expansion.
#[derive(Debug, Clone)]
pub struct FunctionalChaosResult {
    pub(crate) distribution: Distribution,
    pub(crate) transformation: IsoprobabilisticTransform,
    pub(crate) inverse_transformation: IsoprobabilisticTransform,
    pub(crate) basis: Arc<dyn OrthogonalBasis>,
    pub(crate) indices: Vec<usize>,
    /// `(|indices|, output_dimension)`, row `j` for rank `indices[j]`.
    pub(crate) coefficients: Array2<f64>,
    pub(crate) reduced_basis: Vec<BasisFunction>,
    pub(crate) residuals: Array1<f64>,
    pub(crate) relative_errors: Array1<f64>,
    pub(crate) is_least_squares: bool,
    pub(crate) involves_model_selection: bool,
    pub(crate) greedy_traces: Vec<GreedyTrace>,
}

impl FunctionalChaosResult {
    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    /// Input space to basis measure.
    pub fn transformation(&self) -> &IsoprobabilisticTransform {
        &self.transformation
    }

    /// Basis measure back to input space.
    pub fn inverse_transformation(&self) -> &IsoprobabilisticTransform {
        &self.inverse_transformation
    }

    pub fn orthogonal_basis(&self) -> &Arc<dyn OrthogonalBasis> {
        &self.basis
    }

    /// Active ranks, ascending.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn coefficients(&self) -> ArrayView2<'_, f64> {
        self.coefficients.view()
    }

    /// The basis functions of [`indices`](Self::indices), in the same order.
    pub fn reduced_basis(&self) -> &[BasisFunction] {
        &self.reduced_basis
    }

    pub fn residuals(&self) -> ArrayView1<'_, f64> {
        self.residuals.view()
    }

    pub fn relative_errors(&self) -> ArrayView1<'_, f64> {
        self.relative_errors.view()
    }

    pub fn is_least_squares(&self) -> bool {
        self.is_least_squares
    }

    pub fn involves_model_selection(&self) -> bool {
        self.involves_model_selection
    }

    /// One trace per output for greedy fits; empty otherwise.
    pub fn greedy_traces(&self) -> &[GreedyTrace] {
        &self.greedy_traces
    }

    pub fn input_dimension(&self) -> usize {
        self.distribution.dimension()
    }

    pub fn output_dimension(&self) -> usize {
        self.coefficients.ncols()
    }

    /// Multi-index of every active rank. Fails for bases that are not
    /// tensor products.
    pub fn multi_indices(&self) -> Result<Vec<Vec<usize>>, BasisError> {
        self.indices
            .iter()
            .map(|&rank| self.basis.multi_index(rank))
            .collect()
    }

    /// The expansion on the measure space of the basis.
    pub fn composed_model(&self) -> ChaosExpansion {
        ChaosExpansion {
            input_dimension: self.input_dimension(),
            functions: self.reduced_basis.clone(),
            coefficients: self.coefficients.clone(),
        }
    }

    /// The surrogate on the input space.
    pub fn meta_model(&self) -> ChaosSurrogate {
        ChaosSurrogate {
            transformation: self.transformation.clone(),
            expansion: self.composed_model(),
        }
    }

    /// The expansion of `E[Y | X_dims]`: the terms depending only on the
    /// selected inputs, expressed over their marginal distribution.
    ///
    /// Requires an independent copula and a tensor-product basis. Residuals
    /// and relative errors are those of the full fit.
    pub fn conditional_expectation(&self, dims: &[usize]) -> Result<Self, ExpansionError> {
        validate_selection(dims, self.input_dimension())?;
        let mut dims = dims.to_vec();
        dims.sort_unstable();
        if !self.distribution.has_independent_copula() {
            log::warn!("Conditional expectation requested for dependent inputs");
            return Err(ExpansionError::ConditioningUnsupported(
                "the input copula is not independent".to_string(),
            ));
        }
        if !self.basis.is_tensor_product() {
            log::warn!("Conditional expectation requested on a non tensor-product basis");
            return Err(ExpansionError::ConditioningUnsupported(
                "the basis is not a tensor product".to_string(),
            ));
        }

        let marginal_basis = self.basis.marginal_basis(&dims)?;
        let mut terms: Vec<(usize, usize)> = Vec::new();
        for (row, &rank) in self.indices.iter().enumerate() {
            let alpha = self.basis.multi_index(rank)?;
            let outside = alpha
                .iter()
                .enumerate()
                .any(|(d, &degree)| degree > 0 && dims.binary_search(&d).is_err());
            if outside {
                continue;
            }
            let restricted: Vec<usize> = dims.iter().map(|&d| alpha[d]).collect();
            terms.push((marginal_basis.rank_of(&restricted)?, row));
        }
        terms.sort_unstable_by_key(|&(rank, _)| rank);

        let (indices, coefficients) = if terms.is_empty() {
            (vec![0], Array2::zeros((1, self.output_dimension())))
        } else {
            let rows: Vec<usize> = terms.iter().map(|&(_, row)| row).collect();
            (
                terms.iter().map(|&(rank, _)| rank).collect(),
                self.coefficients.select(Axis(0), &rows),
            )
        };
        let reduced_basis = indices
            .iter()
            .map(|&rank| marginal_basis.build(rank))
            .collect::<Result<Vec<_>, _>>()?;
        let transformation = self.transformation.marginal(&dims)?;
        log::debug!(
            "Conditional expectation on {:?}: {} of {} terms kept",
            dims,
            indices.len(),
            self.indices.len()
        );
        Ok(Self {
            distribution: self.distribution.marginal(&dims)?,
            inverse_transformation: transformation.inverse(),
            transformation,
            basis: marginal_basis,
            indices,
            coefficients,
            reduced_basis,
            residuals: self.residuals.clone(),
            relative_errors: self.relative_errors.clone(),
            is_least_squares: self.is_least_squares,
            involves_model_selection: self.involves_model_selection,
            greedy_traces: self.greedy_traces.clone(),
        })
    }
}

/// `z ↦ Σⱼ cⱼ φⱼ(z)` on the measure space of the basis.
#[derive(Debug, Clone)]
pub struct ChaosExpansion {
    input_dimension: usize,
    functions: Vec<BasisFunction>,
    coefficients: Array2<f64>,
}

impl ChaosExpansion {
    fn expand(&self, z: ArrayView1<f64>) -> Array1<f64> {
        let phi: Array1<f64> = self.functions.iter().map(|f| f.evaluate(z)).collect();
        self.coefficients.t().dot(&phi)
    }
}

impl VectorFunction for ChaosExpansion {
    fn input_dimension(&self) -> usize {
        self.input_dimension
    }

    fn output_dimension(&self) -> usize {
        self.coefficients.ncols()
    }

    fn evaluate(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, FunctionError> {
        check_input(self.input_dimension, x)?;
        Ok(self.expand(x))
    }

    fn evaluate_sample(&self, sample: ArrayView2<f64>) -> Result<Array2<f64>, FunctionError> {
        if sample.ncols() != self.input_dimension {
            return Err(FunctionError::InputDimension {
                expected: self.input_dimension,
                found: sample.ncols(),
            });
        }
        Ok(map_rows(sample, self.output_dimension(), |z| self.expand(z)))
    }
}

/// The expansion composed with the isoprobabilistic transform.
#[derive(Debug, Clone)]
pub struct ChaosSurrogate {
    transformation: IsoprobabilisticTransform,
    expansion: ChaosExpansion,
}

impl VectorFunction for ChaosSurrogate {
    fn input_dimension(&self) -> usize {
        self.expansion.input_dimension
    }

    fn output_dimension(&self) -> usize {
        self.expansion.output_dimension()
    }

    fn evaluate(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, FunctionError> {
        check_input(self.input_dimension(), x)?;
        let z = self.transformation.apply(x)?;
        Ok(self.expansion.expand(z.view()))
    }

    fn evaluate_sample(&self, sample: ArrayView2<f64>) -> Result<Array2<f64>, FunctionError> {
        if sample.ncols() != self.input_dimension() {
            return Err(FunctionError::InputDimension {
                expected: self.input_dimension(),
                found: sample.ncols(),
            });
        }
        let transformed = self.transformation.apply_sample(sample)?;
        self.expansion.evaluate_sample(transformed.view())
    }
}
