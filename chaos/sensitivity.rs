//! Moments and Sobol indices read off the coefficients of an expansion.
//!
//! With an orthonormal tensor basis and independent inputs, the variance of
//! the surrogate splits over multi-indices: each non-constant term carries
//! `c²`. Grouping terms by the inputs they involve gives the Sobol indices
//! without any further sampling.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use thiserror::Error;

use crate::basis::BasisError;
use crate::distribution::{validate_selection, DistributionError};
use crate::result::FunctionalChaosResult;

#[derive(Error, Debug)]
pub enum SensitivityError {
    #[error("Sobol indices need a tensor-product basis.")]
    NotTensorProduct,

    #[error("Sobol indices need independent inputs.")]
    DependentInputs,

    #[error(transparent)]
    Basis(#[from] BasisError),

    #[error(transparent)]
    Distribution(#[from] DistributionError),
}

/// Sensitivity analysis of a [`FunctionalChaosResult`].
#[derive(Debug)]
pub struct ChaosSensitivity<'a> {
    result: &'a FunctionalChaosResult,
    multi_indices: Vec<Vec<usize>>,
    variance: Array1<f64>,
}

impl<'a> ChaosSensitivity<'a> {
    pub fn new(result: &'a FunctionalChaosResult) -> Result<Self, SensitivityError> {
        if !result.orthogonal_basis().is_tensor_product() {
            return Err(SensitivityError::NotTensorProduct);
        }
        if !result.distribution().has_independent_copula() {
            return Err(SensitivityError::DependentInputs);
        }
        let multi_indices = result.multi_indices()?;
        let mut sensitivity = Self {
            result,
            multi_indices,
            variance: Array1::zeros(result.output_dimension()),
        };
        sensitivity.variance = sensitivity.partial_variance(|alpha| alpha.iter().any(|&a| a > 0));
        Ok(sensitivity)
    }

    /// Coefficient of the constant term, per output.
    pub fn mean(&self) -> Array1<f64> {
        let coefficients = self.result.coefficients();
        self.multi_indices
            .iter()
            .position(|alpha| alpha.iter().all(|&a| a == 0))
            .map_or_else(
                || Array1::zeros(coefficients.ncols()),
                |row| coefficients.row(row).to_owned(),
            )
    }

    /// Sum of squared non-constant coefficients, per output.
    pub fn variance(&self) -> ArrayView1<'_, f64> {
        self.variance.view()
    }

    /// `(input_dimension, output_dimension)`: terms involving input `i` alone.
    pub fn first_order_indices(&self) -> Array2<f64> {
        self.per_input(|alpha, i| {
            alpha[i] > 0 && alpha.iter().enumerate().all(|(d, &a)| d == i || a == 0)
        })
    }

    /// `(input_dimension, output_dimension)`: every term involving input `i`.
    pub fn total_order_indices(&self) -> Array2<f64> {
        self.per_input(|alpha, i| alpha[i] > 0)
    }

    /// Closed index of a group: the share of variance carried by terms that
    /// involve only inputs of `dims`.
    pub fn group_index(&self, dims: &[usize]) -> Result<Array1<f64>, SensitivityError> {
        validate_selection(dims, self.result.input_dimension())?;
        let share = self.partial_variance(|alpha| {
            alpha.iter().any(|&a| a > 0)
                && alpha
                    .iter()
                    .enumerate()
                    .all(|(d, &a)| a == 0 || dims.contains(&d))
        });
        Ok(self.normalise(share))
    }

    fn per_input<F>(&self, involves: F) -> Array2<f64>
    where
        F: Fn(&[usize], usize) -> bool,
    {
        let dimension = self.result.input_dimension();
        let mut out = Array2::zeros((dimension, self.result.output_dimension()));
        for (i, mut row) in out.axis_iter_mut(Axis(0)).enumerate() {
            let share = self.partial_variance(|alpha| involves(alpha, i));
            row.assign(&self.normalise(share));
        }
        out
    }

    fn partial_variance<F>(&self, keep: F) -> Array1<f64>
    where
        F: Fn(&[usize]) -> bool,
    {
        let coefficients = self.result.coefficients();
        let mut total = Array1::zeros(coefficients.ncols());
        for (alpha, row) in self.multi_indices.iter().zip(coefficients.rows()) {
            if keep(alpha) {
                total += &row.mapv(|c| c * c);
            }
        }
        total
    }

    // Zero variance gives zero indices.
    fn normalise(&self, share: Array1<f64>) -> Array1<f64> {
        share
            .iter()
            .zip(self.variance.iter())
            .map(|(&s, &v)| if v > 0.0 { s / v } else { 0.0 })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{FunctionListBasis, OrthogonalBasis, OrthogonalProductBasis, ScalarFunction};
    use crate::config::ChaosConfig;
    use crate::distribution::{Distribution, Marginal};
    use crate::fitting::CorrectedLeaveOneOut;
    use crate::strategy::{
        ExpansionSetup, ExpansionStrategy, LeastSquaresStrategy, OrthogonalMatchingPursuit,
    };
    use approx::assert_relative_eq;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn setup(output: impl Fn(f64, f64) -> f64) -> ExpansionSetup {
        let marginal = Marginal::Uniform {
            lower: -1.0,
            upper: 1.0,
        };
        let distribution = Distribution::independent(vec![marginal, marginal]).unwrap();
        let basis = OrthogonalProductBasis::for_distribution(&distribution).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let input = Array::from_shape_fn((50, 2), |_| rng.gen_range(-1.0..1.0));
        let y = Array::from_shape_fn((50, 1), |(i, _)| output(input[[i, 0]], input[[i, 1]]));
        ExpansionSetup::new(
            input,
            y,
            None,
            distribution,
            Arc::new(basis),
            ChaosConfig {
                basis_size: 6,
                ..ChaosConfig::default()
            },
        )
        .unwrap()
    }

    fn fit(output: impl Fn(f64, f64) -> f64) -> FunctionalChaosResult {
        LeastSquaresStrategy::new(setup(output)).run().unwrap()
    }

    #[test]
    fn indices_of_a_polynomial_with_an_interaction() {
        // y = 2 + a + b/2 + a·b, with a = √3 x₁, b = √3 x₂ orthonormal.
        let s3 = 3f64.sqrt();
        let result = fit(|x1, x2| 2.0 + s3 * x1 + 0.5 * s3 * x2 + 3.0 * x1 * x2);
        let sensitivity = ChaosSensitivity::new(&result).unwrap();
        assert_relative_eq!(sensitivity.mean()[0], 2.0, epsilon = 1e-9);
        let variance = 1.0 + 0.25 + 1.0;
        assert_relative_eq!(sensitivity.variance()[0], variance, epsilon = 1e-9);

        let first = sensitivity.first_order_indices();
        let total = sensitivity.total_order_indices();
        assert_relative_eq!(first[[0, 0]], 1.0 / variance, epsilon = 1e-9);
        assert_relative_eq!(first[[1, 0]], 0.25 / variance, epsilon = 1e-9);
        assert_relative_eq!(total[[0, 0]], 2.0 / variance, epsilon = 1e-9);
        assert_relative_eq!(total[[1, 0]], 1.25 / variance, epsilon = 1e-9);
        assert_relative_eq!(sensitivity.group_index(&[0, 1]).unwrap()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            sensitivity.group_index(&[1]).unwrap()[0],
            first[[1, 0]],
            epsilon = 1e-12
        );
        assert!(sensitivity.group_index(&[2]).is_err());
    }

    #[test]
    fn constant_output_has_zero_indices() {
        // Greedy selection drops the negligible terms, leaving the constant alone.
        let mut strategy =
            OrthogonalMatchingPursuit::new(setup(|_, _| 4.0), Arc::new(CorrectedLeaveOneOut));
        let result = strategy.run().unwrap();
        assert_eq!(result.indices(), &[0]);
        let sensitivity = ChaosSensitivity::new(&result).unwrap();
        assert_relative_eq!(sensitivity.mean()[0], 4.0, epsilon = 1e-9);
        assert_eq!(sensitivity.variance()[0], 0.0);
        assert!(sensitivity.first_order_indices().iter().all(|&v| v == 0.0));
        assert!(sensitivity.total_order_indices().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn function_list_bases_are_rejected() {
        let measure = Distribution::independent(vec![Marginal::Uniform {
            lower: -1.0,
            upper: 1.0,
        }])
        .unwrap();
        let functions: Vec<ScalarFunction> = vec![
            Arc::new(|_: ndarray::ArrayView1<f64>| 1.0),
            Arc::new(|x: ndarray::ArrayView1<f64>| 3f64.sqrt() * x[0]),
        ];
        let basis: Arc<dyn OrthogonalBasis> = Arc::new(FunctionListBasis::new(measure.clone(), functions));
        let input = Array::from_shape_vec((4, 1), vec![-0.8, -0.1, 0.3, 0.9]).unwrap();
        let output = input.mapv(|x| 1.0 + x);
        let setup = ExpansionSetup::new(
            input,
            output,
            None,
            measure,
            basis,
            ChaosConfig {
                basis_size: 2,
                ..ChaosConfig::default()
            },
        )
        .unwrap();
        let result = LeastSquaresStrategy::new(setup).run().unwrap();
        assert!(matches!(
            ChaosSensitivity::new(&result),
            Err(SensitivityError::NotTensorProduct)
        ));
    }
}
