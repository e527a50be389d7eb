use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;

use super::{ExpansionError, ExpansionSetup, ExpansionStrategy};
use crate::least_squares::LeastSquaresMethod;
use crate::result::FunctionalChaosResult;

/// Weighted least squares over a fixed active set.
///
/// The factorization is built once and shared by every output component,
/// which are then solved in parallel.
#[derive(Debug)]
pub struct LeastSquaresStrategy {
    setup: ExpansionSetup,
}

impl LeastSquaresStrategy {
    pub fn new(setup: ExpansionSetup) -> Self {
        Self { setup }
    }

    pub fn set_active_functions(&mut self, ranks: &[usize]) -> Result<(), ExpansionError> {
        self.setup.set_active_functions(ranks)
    }
}

impl ExpansionStrategy for LeastSquaresStrategy {
    fn setup(&self) -> &ExpansionSetup {
        &self.setup
    }

    fn run(&mut self) -> Result<FunctionalChaosResult, ExpansionError> {
        let ranks = self.setup.active_functions().to_vec();
        self.setup.proxy_mut().fill(&ranks)?;
        let setup = &self.setup;
        let method = setup.config().decomposition_method;
        let solver = LeastSquaresMethod::new(setup.proxy(), setup.weights(), &ranks, method)?;
        log::info!(
            "Least-squares fit of {} outputs over {} basis functions ({:?})",
            setup.output_dimension(),
            ranks.len(),
            method
        );

        let output = setup.output_sample();
        let solutions = output
            .axis_iter(Axis(1))
            .into_par_iter()
            .map(|y| solver.solve(y))
            .collect::<Result<Vec<Array1<f64>>, _>>()?;
        let mut coefficients = Array2::<f64>::zeros((ranks.len(), solutions.len()));
        for (mut column, solution) in coefficients.axis_iter_mut(Axis(1)).zip(&solutions) {
            column.assign(solution);
        }
        setup.assemble(ranks, coefficients, true, false, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{OrthogonalProductBasis, PolynomialFamily};
    use crate::config::{ChaosConfig, DecompositionMethod};
    use crate::distribution::{Distribution, Marginal};
    use approx::assert_relative_eq;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn normal_setup(method: DecompositionMethod) -> ExpansionSetup {
        let distribution = Distribution::independent(vec![
            Marginal::Normal { mean: 1.0, std: 2.0 },
            Marginal::Uniform {
                lower: -2.0,
                upper: 2.0,
            },
        ])
        .unwrap();
        let basis = OrthogonalProductBasis::for_distribution(&distribution).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let input = Array::from_shape_fn((60, 2), |(_, j)| {
            if j == 0 {
                rng.gen_range(-4.0..6.0)
            } else {
                rng.gen_range(-2.0..2.0)
            }
        });
        let output = Array::from_shape_fn((60, 2), |(i, k)| {
            let z = (input[[i, 0]] - 1.0) / 2.0;
            let u = input[[i, 1]] / 2.0;
            if k == 0 { 3.0 + z * u } else { z * z - u }
        });
        ExpansionSetup::new(
            input,
            output,
            None,
            distribution,
            Arc::new(basis),
            ChaosConfig {
                basis_size: 6,
                decomposition_method: method,
                ..ChaosConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn every_output_is_fitted_exactly_when_in_span() {
        for method in [
            DecompositionMethod::Qr,
            DecompositionMethod::Svd,
            DecompositionMethod::Cholesky,
        ] {
            let mut strategy = LeastSquaresStrategy::new(normal_setup(method));
            let result = strategy.run().unwrap();
            assert!(result.is_least_squares());
            assert!(!result.involves_model_selection());
            assert_eq!(result.indices(), &[0, 1, 2, 3, 4, 5]);
            let c = result.coefficients();
            // 3 + z·u = 3 + φ₄ / √3 with u = ψ₁ / √3 and z = He₁.
            assert_relative_eq!(c[[0, 0]], 3.0, epsilon = 1e-9);
            assert_relative_eq!(c[[4, 0]], 1.0 / 3f64.sqrt(), epsilon = 1e-9);
            // z² - u = 1 + √2 φ₃ - φ₂ / √3.
            assert_relative_eq!(c[[0, 1]], 1.0, epsilon = 1e-9);
            assert_relative_eq!(c[[3, 1]], 2f64.sqrt(), epsilon = 1e-9);
            assert_relative_eq!(c[[2, 1]], -1.0 / 3f64.sqrt(), epsilon = 1e-9);
            assert!(result.residuals().iter().all(|&r| r < 1e-10));
        }
    }

    #[test]
    fn duplicated_points_make_a_numerical_failure() {
        let distribution = Distribution::independent(vec![PolynomialFamily::Legendre.measure()]).unwrap();
        let basis = OrthogonalProductBasis::for_distribution(&distribution).unwrap();
        let input = Array::from_shape_vec((4, 1), vec![0.3, 0.3, -0.6, -0.6]).unwrap();
        let output = input.mapv(|x| x * x);
        let setup = ExpansionSetup::new(
            input,
            output,
            None,
            distribution,
            Arc::new(basis),
            ChaosConfig {
                basis_size: 3,
                ..ChaosConfig::default()
            },
        )
        .unwrap();
        let err = LeastSquaresStrategy::new(setup).run().unwrap_err();
        assert!(err.is_numerical_failure(), "{err}");
    }
}
