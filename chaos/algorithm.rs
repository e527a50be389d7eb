//! Front door wiring a basis, a strategy and a fitting algorithm together.

use ndarray::{Array1, Array2};
use std::sync::Arc;

use crate::basis::{OrthogonalBasis, OrthogonalProductBasis, PolynomialFamily};
use crate::config::{ChaosConfig, FittingKind, StrategyKind, StudyConfig};
use crate::distribution::Distribution;
use crate::enumerate::EnumerateFunction;
use crate::fitting::{CorrectedLeaveOneOut, FittingAlgorithm, KFold};
use crate::result::FunctionalChaosResult;
use crate::strategy::{
    ExpansionError, ExpansionSetup, ExpansionStrategy, IntegrationStrategy, LeastSquaresStrategy,
    OrthogonalMatchingPursuit, ProgressCallback, ProjectionStrategy,
};

/// Builds and runs a functional chaos expansion.
///
/// Defaults: the standard tensor basis matched to the marginals with linear
/// enumeration, greedy selection, and corrected leave-one-out fitting.
pub struct FunctionalChaosAlgorithm {
    input_sample: Array2<f64>,
    output_sample: Array2<f64>,
    distribution: Distribution,
    weights: Option<Array1<f64>>,
    basis: Option<Arc<dyn OrthogonalBasis>>,
    strategy: StrategyKind,
    fitting: Arc<dyn FittingAlgorithm>,
    config: ChaosConfig,
    progress: Option<ProgressCallback>,
}

impl FunctionalChaosAlgorithm {
    pub fn new(input_sample: Array2<f64>, output_sample: Array2<f64>, distribution: Distribution) -> Self {
        Self {
            input_sample,
            output_sample,
            distribution,
            weights: None,
            basis: None,
            strategy: StrategyKind::default(),
            fitting: Arc::new(CorrectedLeaveOneOut),
            config: ChaosConfig::default(),
            progress: None,
        }
    }

    /// Everything a study file describes: distribution, basis, strategy,
    /// fitting and numeric configuration.
    pub fn from_study(
        input_sample: Array2<f64>,
        output_sample: Array2<f64>,
        study: &StudyConfig,
    ) -> Result<Self, ExpansionError> {
        let (distribution, basis) = study_basis(study)?;
        let fitting: Arc<dyn FittingAlgorithm> = match study.fitting {
            FittingKind::CorrectedLeaveOneOut => Arc::new(CorrectedLeaveOneOut),
            FittingKind::KFold { folds } => Arc::new(KFold::new(folds)?),
        };
        Ok(Self::new(input_sample, output_sample, distribution)
            .with_basis(Arc::new(basis))
            .with_strategy(study.strategy)
            .with_fitting(fitting)
            .with_config(study.chaos.clone()))
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_basis(mut self, basis: Arc<dyn OrthogonalBasis>) -> Self {
        self.basis = Some(basis);
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Only the greedy strategy consults the fitting algorithm.
    pub fn with_fitting(mut self, fitting: Arc<dyn FittingAlgorithm>) -> Self {
        self.fitting = fitting;
        self
    }

    pub fn with_config(mut self, config: ChaosConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validates the inputs and returns the configured strategy.
    pub fn build_strategy(self) -> Result<ProjectionStrategy, ExpansionError> {
        let basis: Arc<dyn OrthogonalBasis> = match self.basis {
            Some(basis) => basis,
            None => Arc::new(OrthogonalProductBasis::for_distribution(&self.distribution)?),
        };
        let setup = ExpansionSetup::new(
            self.input_sample,
            self.output_sample,
            self.weights,
            self.distribution,
            basis,
            self.config,
        )?;
        Ok(match self.strategy {
            StrategyKind::Integration => ProjectionStrategy::Integration(IntegrationStrategy::new(setup)),
            StrategyKind::LeastSquares => {
                ProjectionStrategy::LeastSquares(LeastSquaresStrategy::new(setup))
            }
            StrategyKind::OrthogonalMatchingPursuit => {
                let greedy = OrthogonalMatchingPursuit::new(setup, self.fitting);
                ProjectionStrategy::Greedy(match self.progress {
                    Some(progress) => greedy.with_progress(progress),
                    None => greedy,
                })
            }
        })
    }

    pub fn run(self) -> Result<FunctionalChaosResult, ExpansionError> {
        let strategy_kind = self.strategy;
        let mut strategy = self.build_strategy()?;
        log::info!(
            "Running {:?} expansion on {} observations",
            strategy_kind,
            strategy.setup().sample_size()
        );
        strategy.run()
    }
}

/// The input distribution of a study and the tensor basis it asks for.
/// Families default to the one matching each marginal.
pub fn study_basis(
    study: &StudyConfig,
) -> Result<(Distribution, OrthogonalProductBasis), ExpansionError> {
    study.validate()?;
    let distribution = Distribution::new(study.marginals.clone(), study.copula.clone())?;
    let families = match &study.families {
        Some(families) => families.clone(),
        None => study.marginals.iter().map(PolynomialFamily::for_marginal).collect(),
    };
    let enumerate = EnumerateFunction::new(families.len(), study.enumerate)?;
    let basis = OrthogonalProductBasis::new(families, enumerate)?;
    Ok((distribution, basis))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DecompositionMethod;
    use crate::distribution::Marginal;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::Normal;

    const STUDY: &str = r#"
strategy = "least_squares"

[chaos]
basis_size = 6
decomposition_method = "svd"

[[marginals]]
family = "uniform"
lower = 0.0
upper = 4.0

[[marginals]]
family = "normal"
mean = 1.0
std = 0.5
"#;

    fn sample() -> (Array2<f64>, Array2<f64>) {
        let input = Array::from_shape_fn((25, 2), |(i, j)| {
            let t = i as f64 / 24.0;
            if j == 0 { 4.0 * t } else { 1.0 + (7.0 * t).sin() }
        });
        let output = Array::from_shape_fn((25, 1), |(i, _)| input[[i, 0]] + 2.0 * input[[i, 1]]);
        (input, output)
    }

    #[test]
    fn study_drives_every_choice() {
        let study = StudyConfig::from_toml_str(STUDY).unwrap();
        let (input, output) = sample();
        let strategy = FunctionalChaosAlgorithm::from_study(input, output, &study)
            .unwrap()
            .build_strategy()
            .unwrap();
        assert!(matches!(strategy, ProjectionStrategy::LeastSquares(_)));
        let setup = strategy.setup();
        assert_eq!(setup.config().decomposition_method, DecompositionMethod::Svd);
        assert_eq!(setup.active_functions().len(), 6);
        assert!(setup.basis().is_tensor_product());
    }

    #[test]
    fn linear_model_is_recovered_through_the_front_door() {
        let mut rng = StdRng::seed_from_u64(11);
        let normal = Normal::new(1.0, 0.5).unwrap();
        let input = Array::from_shape_fn((120, 2), |(_, j)| {
            if j == 0 { rng.gen_range(0.0..4.0) } else { rng.sample(normal) }
        });
        let output = Array::from_shape_fn((120, 1), |(i, _)| input[[i, 0]] + 2.0 * input[[i, 1]]);
        let distribution = Distribution::independent(vec![
            Marginal::Uniform {
                lower: 0.0,
                upper: 4.0,
            },
            Marginal::Normal { mean: 1.0, std: 0.5 },
        ])
        .unwrap();
        let result = FunctionalChaosAlgorithm::new(input, output, distribution)
            .with_config(ChaosConfig {
                basis_size: 6,
                ..ChaosConfig::default()
            })
            .run()
            .unwrap();
        assert!(result.involves_model_selection());
        // x₁ + 2x₂ = 4 + 2u + z with u uniform on [-1, 1] and z standard normal.
        assert_eq!(result.indices(), &[0, 1, 2]);
        let c = result.coefficients();
        assert!((c[[0, 0]] - 4.0).abs() < 1e-9);
        assert!((c[[1, 0]] - 2.0 / 3f64.sqrt()).abs() < 1e-9);
        assert!((c[[2, 0]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn explicit_families_override_the_defaults() {
        let mut study = StudyConfig::from_toml_str(STUDY).unwrap();
        let (_, basis) = study_basis(&study).unwrap();
        assert_eq!(basis.families(), &[PolynomialFamily::Legendre, PolynomialFamily::Hermite]);
        study.families = Some(vec![PolynomialFamily::Hermite, PolynomialFamily::Hermite]);
        let (distribution, basis) = study_basis(&study).unwrap();
        assert_eq!(basis.families(), &[PolynomialFamily::Hermite, PolynomialFamily::Hermite]);
        assert_eq!(distribution.dimension(), 2);
    }

    #[test]
    fn invalid_studies_are_rejected() {
        let (input, output) = sample();
        let mut study = StudyConfig::from_toml_str(STUDY).unwrap();
        study.fitting = FittingKind::KFold { folds: 1 };
        assert!(matches!(
            FunctionalChaosAlgorithm::from_study(input, output, &study),
            Err(ExpansionError::Config(_))
        ));
    }
}
