//! # Configuration
//!
//! [`ChaosConfig`] holds the numeric knobs of an expansion. Every value is an
//! explicit field with a documented default; nothing is read from global
//! state. [`StudyConfig`] adds what the command line needs to set up a whole
//! study from one TOML file: the input distribution, the basis and the
//! strategy.
//!
//! ```toml
//! strategy = "orthogonal_matching_pursuit"
//!
//! [chaos]
//! basis_size = 35
//! decomposition_method = "qr"
//!
//! [fitting]
//! kind = "k_fold"
//! folds = 5
//!
//! [[marginals]]
//! family = "uniform"
//! lower = 0.0
//! upper = 1.0
//!
//! [[marginals]]
//! family = "normal"
//! mean = 0.0
//! std = 2.0
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

use crate::basis::PolynomialFamily;
use crate::distribution::{Copula, Marginal};
use crate::enumerate::EnumerateRule;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Factorization used by the least-squares solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMethod {
    #[default]
    Qr,
    Svd,
    Cholesky,
}

/// Numeric configuration of an expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChaosConfig {
    /// Number of candidate basis functions, ranks `0..basis_size`.
    pub basis_size: usize,
    pub decomposition_method: DecompositionMethod,
    /// Greedy stop when the current error exceeds this multiple of the best.
    pub max_error_factor: f64,
    /// Greedy stop when the best error falls below this.
    pub error_threshold: f64,
    /// Greedy stop when a non-improving error exceeds this.
    pub maximum_error: f64,
    /// Greedy coefficients smaller in magnitude are treated as zero.
    pub small_coefficient_epsilon: f64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            basis_size: 100,
            decomposition_method: DecompositionMethod::Qr,
            max_error_factor: 2.0,
            error_threshold: 0.0,
            maximum_error: 0.5,
            small_coefficient_epsilon: 1e-10,
        }
    }
}

impl ChaosConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.basis_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "basis_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.max_error_factor.is_finite() && self.max_error_factor >= 1.0) {
            return Err(ConfigError::InvalidValue {
                field: "max_error_factor",
                reason: format!("must be a finite value >= 1, got {}", self.max_error_factor),
            });
        }
        let non_negative = [
            ("error_threshold", self.error_threshold),
            ("small_coefficient_epsilon", self.small_coefficient_epsilon),
        ];
        for (field, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: format!("must be finite and non-negative, got {value}"),
                });
            }
        }
        if self.maximum_error.is_nan() || self.maximum_error < 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "maximum_error",
                reason: format!("must be non-negative, got {}", self.maximum_error),
            });
        }
        Ok(())
    }
}

/// Which expansion strategy a study runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Integration,
    LeastSquares,
    #[default]
    OrthogonalMatchingPursuit,
}

/// Error estimate driving greedy model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittingKind {
    #[default]
    CorrectedLeaveOneOut,
    KFold { folds: usize },
}

/// A complete study as read from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudyConfig {
    #[serde(default)]
    pub chaos: ChaosConfig,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub fitting: FittingKind,
    pub marginals: Vec<Marginal>,
    #[serde(default)]
    pub copula: Copula,
    /// Polynomial family per input; defaults to the family matching each marginal.
    #[serde(default)]
    pub families: Option<Vec<PolynomialFamily>>,
    #[serde(default)]
    pub enumerate: EnumerateRule,
}

impl StudyConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StudyConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(toml::to_string_pretty(self)?.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chaos.validate()?;
        if self.marginals.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "marginals",
                reason: "at least one marginal is required".to_string(),
            });
        }
        if let Some(families) = &self.families {
            if families.len() != self.marginals.len() {
                return Err(ConfigError::InvalidValue {
                    field: "families",
                    reason: format!(
                        "{} families given for {} marginals",
                        families.len(),
                        self.marginals.len()
                    ),
                });
            }
        }
        if let FittingKind::KFold { folds } = self.fitting {
            if folds < 2 {
                return Err(ConfigError::InvalidValue {
                    field: "fitting.folds",
                    reason: format!("K-fold needs at least 2 folds, got {folds}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STUDY: &str = r#"
strategy = "least_squares"

[chaos]
basis_size = 10
decomposition_method = "cholesky"

[fitting]
kind = "k_fold"
folds = 4

[[marginals]]
family = "uniform"
lower = 0.0
upper = 1.0

[[marginals]]
family = "exponential"
rate = 2.0

[enumerate]
rule = "hyperbolic"
q = 0.5
"#;

    #[test]
    fn parses_a_full_study() {
        let study = StudyConfig::from_toml_str(STUDY).unwrap();
        assert_eq!(study.strategy, StrategyKind::LeastSquares);
        assert_eq!(study.chaos.basis_size, 10);
        assert_eq!(study.chaos.decomposition_method, DecompositionMethod::Cholesky);
        // Unspecified knobs keep their defaults.
        assert_eq!(study.chaos.max_error_factor, 2.0);
        assert_eq!(study.fitting, FittingKind::KFold { folds: 4 });
        assert_eq!(
            study.marginals[1],
            Marginal::Exponential {
                rate: 2.0,
                location: 0.0
            }
        );
        assert_eq!(study.copula, Copula::Independent);
        assert_eq!(study.enumerate, EnumerateRule::Hyperbolic { q: 0.5 });
    }

    #[test]
    fn defaults_are_valid() {
        let config = ChaosConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.decomposition_method, DecompositionMethod::Qr);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let config = ChaosConfig {
            max_error_factor: 0.5,
            ..ChaosConfig::default()
        };
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "max_error_factor"),
            other => panic!("expected an invalid value, got {:?}", other),
        }
        let config = ChaosConfig {
            basis_size: 0,
            ..ChaosConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(StudyConfig::from_toml_str("marginals = []").is_err());
        assert!(StudyConfig::from_toml_str("bogus = 1\nmarginals = []").is_err());
    }

    #[test]
    fn save_and_load_round_trip() {
        let study = StudyConfig::from_toml_str(STUDY).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("study.toml");
        study.save(&path).unwrap();
        assert_eq!(StudyConfig::load(&path).unwrap(), study);
    }
}
