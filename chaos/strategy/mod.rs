//! # Expansion strategies
//!
//! A strategy turns observations into coefficients over an active set of
//! basis ranks. All three share an [`ExpansionSetup`], which validates the
//! inputs once, carries the sample onto the measure of the basis and owns the
//! design cache:
//!
//! - [`IntegrationStrategy`]: weighted projection `C = Ψᵀ (w ∘ Y)`.
//! - [`LeastSquaresStrategy`]: one weighted least-squares solve over the
//!   active set.
//! - [`OrthogonalMatchingPursuit`]: greedy selection of the active set,
//!   stopped by a cross-validation error.
//!
//! [`ProjectionStrategy`] is the closed set of strategies as one value.

mod integration;
mod omp;
mod regression;

pub use integration::IntegrationStrategy;
pub use omp::{GreedyProgress, GreedyTrace, OrthogonalMatchingPursuit, ProgressCallback};
pub use regression::LeastSquaresStrategy;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use std::sync::Arc;
use thiserror::Error;

use crate::basis::{BasisError, OrthogonalBasis};
use crate::config::{ChaosConfig, ConfigError};
use crate::design::{DesignError, DesignProxy};
use crate::distribution::{Distribution, DistributionError, IsoprobabilisticTransform};
use crate::fitting::FittingError;
use crate::function::FunctionError;
use crate::least_squares::LeastSquaresError;
use crate::result::FunctionalChaosResult;

#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error("The input sample is empty; at least one observation is required.")]
    EmptySample,

    #[error("Input sample has {input} rows but output sample has {output}.")]
    SampleSizeMismatch { input: usize, output: usize },

    #[error("The output sample has no columns.")]
    EmptyOutput,

    #[error("Input sample has {sample} columns but the distribution has dimension {distribution}.")]
    InputDimension { sample: usize, distribution: usize },

    #[error("Basis has dimension {basis} but the distribution has dimension {distribution}.")]
    BasisDimension { basis: usize, distribution: usize },

    #[error("Weight vector has length {found}, expected {expected}.")]
    WeightLength { expected: usize, found: usize },

    #[error("Weight at index {index} is {value}; weights must be finite and non-negative.")]
    InvalidWeight { index: usize, value: f64 },

    #[error("Weights sum to zero.")]
    ZeroWeightSum,

    #[error("Basis size {basis_size} exceeds the {cardinality} functions of the basis.")]
    BasisSizeExceedsCardinality { basis_size: usize, cardinality: usize },

    #[error("Invalid active functions: {0}")]
    InvalidActiveFunctions(String),

    #[error("Conditional expectation is not available: {0}")]
    ConditioningUnsupported(String),

    #[error(transparent)]
    Basis(#[from] BasisError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),

    #[error(transparent)]
    Design(#[from] DesignError),

    #[error(transparent)]
    LeastSquares(#[from] LeastSquaresError),

    #[error(transparent)]
    Fitting(#[from] FittingError),

    #[error(transparent)]
    Function(#[from] FunctionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ExpansionError {
    /// Rank deficiency, ill-conditioning or non-finite coefficients.
    pub fn is_numerical_failure(&self) -> bool {
        matches!(
            self,
            ExpansionError::LeastSquares(LeastSquaresError::NumericalFailure(_))
                | ExpansionError::Fitting(FittingError::LeastSquares(
                    LeastSquaresError::NumericalFailure(_)
                ))
        )
    }
}

/// Validated inputs of an expansion and the design cache built on them.
#[derive(Debug)]
pub struct ExpansionSetup {
    input_sample: Array2<f64>,
    output_sample: Array2<f64>,
    weights: Array1<f64>,
    distribution: Distribution,
    basis: Arc<dyn OrthogonalBasis>,
    config: ChaosConfig,
    transformation: IsoprobabilisticTransform,
    proxy: DesignProxy,
    active_functions: Vec<usize>,
}

impl ExpansionSetup {
    /// Validates everything up front. `weights` defaults to `1/n` each.
    pub fn new(
        input_sample: Array2<f64>,
        output_sample: Array2<f64>,
        weights: Option<Array1<f64>>,
        distribution: Distribution,
        basis: Arc<dyn OrthogonalBasis>,
        config: ChaosConfig,
    ) -> Result<Self, ExpansionError> {
        config.validate()?;
        let n = input_sample.nrows();
        if n == 0 {
            return Err(ExpansionError::EmptySample);
        }
        if output_sample.nrows() != n {
            return Err(ExpansionError::SampleSizeMismatch {
                input: n,
                output: output_sample.nrows(),
            });
        }
        if output_sample.ncols() == 0 {
            return Err(ExpansionError::EmptyOutput);
        }
        if input_sample.ncols() != distribution.dimension() {
            return Err(ExpansionError::InputDimension {
                sample: input_sample.ncols(),
                distribution: distribution.dimension(),
            });
        }
        if basis.dimension() != distribution.dimension() {
            return Err(ExpansionError::BasisDimension {
                basis: basis.dimension(),
                distribution: distribution.dimension(),
            });
        }
        if let Some(cardinality) = basis.cardinality() {
            if config.basis_size > cardinality {
                return Err(ExpansionError::BasisSizeExceedsCardinality {
                    basis_size: config.basis_size,
                    cardinality,
                });
            }
        }
        let weights = match weights {
            Some(w) => validate_weights(w, n)?,
            None => Array1::from_elem(n, 1.0 / n as f64),
        };

        let transformation = IsoprobabilisticTransform::new(&distribution, &basis.measure())?;
        let transformed = transformation.apply_sample(input_sample.view())?;
        let functions = (0..config.basis_size)
            .map(|rank| basis.build(rank))
            .collect::<Result<Vec<_>, _>>()?;
        log::debug!(
            "Expansion setup: {} observations, {} inputs, {} outputs, {} candidate functions",
            n,
            input_sample.ncols(),
            output_sample.ncols(),
            functions.len()
        );
        let active_functions = (0..config.basis_size).collect();
        Ok(Self {
            input_sample,
            output_sample,
            weights,
            distribution,
            basis,
            config,
            transformation,
            proxy: DesignProxy::new(transformed, functions),
            active_functions,
        })
    }

    pub fn input_sample(&self) -> ArrayView2<'_, f64> {
        self.input_sample.view()
    }

    pub fn output_sample(&self) -> ArrayView2<'_, f64> {
        self.output_sample.view()
    }

    pub fn weights(&self) -> ArrayView1<'_, f64> {
        self.weights.view()
    }

    pub fn distribution(&self) -> &Distribution {
        &self.distribution
    }

    pub fn basis(&self) -> &Arc<dyn OrthogonalBasis> {
        &self.basis
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    pub fn transformation(&self) -> &IsoprobabilisticTransform {
        &self.transformation
    }

    pub fn proxy(&self) -> &DesignProxy {
        &self.proxy
    }

    pub fn sample_size(&self) -> usize {
        self.input_sample.nrows()
    }

    pub fn output_dimension(&self) -> usize {
        self.output_sample.ncols()
    }

    pub fn active_functions(&self) -> &[usize] {
        &self.active_functions
    }

    /// Restricts the expansion to `ranks`, a non-empty duplicate-free subset
    /// of `0..basis_size`. Stored in ascending order.
    pub fn set_active_functions(&mut self, ranks: &[usize]) -> Result<(), ExpansionError> {
        if ranks.is_empty() {
            return Err(ExpansionError::InvalidActiveFunctions(
                "the active set is empty".to_string(),
            ));
        }
        let mut sorted = ranks.to_vec();
        sorted.sort_unstable();
        if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
            return Err(ExpansionError::InvalidActiveFunctions(format!(
                "rank {} appears more than once",
                pair[0]
            )));
        }
        if let Some(&rank) = sorted.iter().find(|&&r| r >= self.config.basis_size) {
            return Err(ExpansionError::InvalidActiveFunctions(format!(
                "rank {} is not below the basis size {}",
                rank, self.config.basis_size
            )));
        }
        self.active_functions = sorted;
        Ok(())
    }

    pub(crate) fn proxy_mut(&mut self) -> &mut DesignProxy {
        &mut self.proxy
    }

    /// Packages coefficients over `indices` (ascending, already cached) into
    /// a result, measuring residuals on the unweighted sample.
    pub(crate) fn assemble(
        &self,
        indices: Vec<usize>,
        coefficients: Array2<f64>,
        is_least_squares: bool,
        involves_model_selection: bool,
        greedy_traces: Vec<GreedyTrace>,
    ) -> Result<FunctionalChaosResult, ExpansionError> {
        let fitted = self.proxy.design(&indices)?.dot(&coefficients);
        let residual = &self.output_sample - &fitted;
        let (residuals, relative_errors) = residual_summary(residual.view(), self.output_sample.view());
        log::info!(
            "Expansion over {} of {} candidate functions, relative errors {:?}",
            indices.len(),
            self.config.basis_size,
            relative_errors.to_vec()
        );
        let reduced_basis = indices
            .iter()
            .map(|&rank| self.proxy.functions()[rank].clone())
            .collect();
        Ok(FunctionalChaosResult {
            distribution: self.distribution.clone(),
            transformation: self.transformation.clone(),
            inverse_transformation: self.transformation.inverse(),
            basis: Arc::clone(&self.basis),
            indices,
            coefficients,
            reduced_basis,
            residuals,
            relative_errors,
            is_least_squares,
            involves_model_selection,
            greedy_traces,
        })
    }
}

fn validate_weights(weights: Array1<f64>, n: usize) -> Result<Array1<f64>, ExpansionError> {
    if weights.len() != n {
        return Err(ExpansionError::WeightLength {
            expected: n,
            found: weights.len(),
        });
    }
    if let Some((index, &value)) = weights
        .iter()
        .enumerate()
        .find(|(_, w)| !(w.is_finite() && **w >= 0.0))
    {
        return Err(ExpansionError::InvalidWeight { index, value });
    }
    if !(weights.sum() > 0.0) {
        return Err(ExpansionError::ZeroWeightSum);
    }
    Ok(weights)
}

/// Per output: `√(Σ r²) / n`, and the mean square residual over the
/// population variance of the output (unnormalised when that is zero).
fn residual_summary(residual: ArrayView2<f64>, output: ArrayView2<f64>) -> (Array1<f64>, Array1<f64>) {
    let n = residual.nrows() as f64;
    let squares = residual.map_axis(Axis(0), |r| r.dot(&r));
    let residuals = squares.mapv(|s| s.sqrt() / n);
    let relative_errors = squares
        .iter()
        .zip(output.axis_iter(Axis(1)))
        .map(|(&s, y)| {
            let mean = y.sum() / n;
            let variance = y.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            if variance > 0.0 { s / n / variance } else { s / n }
        })
        .collect();
    (residuals, relative_errors)
}

/// A configured expansion, ready to run.
pub trait ExpansionStrategy {
    fn setup(&self) -> &ExpansionSetup;

    fn run(&mut self) -> Result<FunctionalChaosResult, ExpansionError>;
}

/// The closed set of strategies.
pub enum ProjectionStrategy {
    Integration(IntegrationStrategy),
    LeastSquares(LeastSquaresStrategy),
    Greedy(OrthogonalMatchingPursuit),
}

impl ExpansionStrategy for ProjectionStrategy {
    fn setup(&self) -> &ExpansionSetup {
        match self {
            ProjectionStrategy::Integration(s) => s.setup(),
            ProjectionStrategy::LeastSquares(s) => s.setup(),
            ProjectionStrategy::Greedy(s) => s.setup(),
        }
    }

    fn run(&mut self) -> Result<FunctionalChaosResult, ExpansionError> {
        match self {
            ProjectionStrategy::Integration(s) => s.run(),
            ProjectionStrategy::LeastSquares(s) => s.run(),
            ProjectionStrategy::Greedy(s) => s.run(),
        }
    }
}
