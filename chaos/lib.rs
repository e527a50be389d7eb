//! # polychaos
//!
//! Sparse functional chaos expansions. A vector-valued model known only
//! through input/output observations is projected onto an orthonormal
//! polynomial basis associated with the input distribution, giving a cheap
//! closed-form surrogate together with its moments and Sobol indices.
//!
//! The pieces, from the leaves up:
//!
//! - [`distribution`]: marginals, copulas and the isoprobabilistic transform
//!   that carries inputs onto the measure of the basis.
//! - [`enumerate`] and [`basis`]: rank ↔ multi-index bijections and the
//!   orthonormal bases built on them.
//! - [`design`]: the design-matrix cache, one column per basis rank.
//! - [`least_squares`]: weighted least squares with incremental updates.
//! - [`fitting`]: cross-validation error estimates used for model selection.
//! - [`strategy`]: integration, least-squares and greedy (OMP) expansions.
//! - [`result`]: the immutable expansion result and its surrogate.
//! - [`sensitivity`]: moments and Sobol indices from the coefficients.
//! - [`algorithm`]: a front door that wires everything from a [`config`].
//! - [`data`]: CSV samples for the command line.

#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod algorithm;
pub mod basis;
pub mod config;
pub mod data;
pub mod design;
pub mod distribution;
pub mod enumerate;
pub mod fitting;
pub mod function;
pub mod least_squares;
pub mod result;
pub mod sensitivity;
pub mod strategy;

pub use algorithm::FunctionalChaosAlgorithm;
pub use basis::{BasisFunction, FunctionListBasis, OrthogonalBasis, OrthogonalProductBasis, PolynomialFamily};
pub use config::{ChaosConfig, DecompositionMethod, StudyConfig};
pub use distribution::{Copula, Distribution, IsoprobabilisticTransform, Marginal};
pub use enumerate::{EnumerateFunction, EnumerateRule};
pub use fitting::{CorrectedLeaveOneOut, FittingAlgorithm, KFold};
pub use function::VectorFunction;
pub use result::FunctionalChaosResult;
pub use strategy::{
    ExpansionError, ExpansionStrategy, IntegrationStrategy, LeastSquaresStrategy,
    OrthogonalMatchingPursuit, ProjectionStrategy,
};
