use ndarray::Axis;

use super::{ExpansionError, ExpansionSetup, ExpansionStrategy};
use crate::result::FunctionalChaosResult;

/// Projection by weighted quadrature: `C[j, k] = Σᵢ wᵢ φⱼ(xᵢ) yᵢₖ`.
///
/// Exact when the sample and weights form a quadrature rule that integrates
/// every product `φⱼ · y` exactly.
#[derive(Debug)]
pub struct IntegrationStrategy {
    setup: ExpansionSetup,
}

impl IntegrationStrategy {
    pub fn new(setup: ExpansionSetup) -> Self {
        Self { setup }
    }

    pub fn set_active_functions(&mut self, ranks: &[usize]) -> Result<(), ExpansionError> {
        self.setup.set_active_functions(ranks)
    }
}

impl ExpansionStrategy for IntegrationStrategy {
    fn setup(&self) -> &ExpansionSetup {
        &self.setup
    }

    fn run(&mut self) -> Result<FunctionalChaosResult, ExpansionError> {
        let ranks = self.setup.active_functions().to_vec();
        let weights = self.setup.weights().to_owned();
        let proxy = self.setup.proxy_mut();
        // Rows of the design come out scaled by √w; scaling Y the same way
        // gives Σ w φ y.
        proxy.set_weight(Some(weights.view()))?;
        let design = proxy.compute_design(&ranks);
        proxy.set_weight(None)?;
        let design = design?;

        let sqrt_weights = weights.mapv(f64::sqrt).insert_axis(Axis(1));
        let weighted_output = &self.setup.output_sample() * &sqrt_weights;
        let coefficients = design.t().dot(&weighted_output);
        log::info!("Integration projection over {} basis functions", ranks.len());
        self.setup.assemble(ranks, coefficients, false, false, Vec::new())
    }
}
