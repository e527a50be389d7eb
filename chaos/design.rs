//! # Design-matrix cache
//!
//! The design matrix of an expansion has one row per (transformed) input
//! point and one column per basis rank, `Ψ[i, j] = φ_j(x_i)`. Strategies ask
//! for arbitrary subsets of columns many times, and the greedy strategy
//! revisits the same candidates on every iteration, so each column is
//! evaluated once and kept.
//!
//! The cache is an owned table keyed by rank. It only grows through
//! `&mut self`; once the needed columns are in, it can be shared read-only
//! between output components. Row weights are a materialisation option and
//! never touch the cached columns.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rayon::prelude::*;
use thiserror::Error;

use crate::basis::BasisFunction;

#[derive(Error, Debug)]
pub enum DesignError {
    #[error("Basis rank {rank} requested, but only {available} basis functions were supplied.")]
    RankOutOfRange { rank: usize, available: usize },

    #[error("Column for basis rank {0} has not been computed yet.")]
    NotCached(usize),

    #[error("Weight vector has length {found}, expected one weight per sample point ({expected}).")]
    WeightLength { expected: usize, found: usize },

    #[error("Weight at index {index} is {value}; weights must be finite and non-negative.")]
    InvalidWeight { index: usize, value: f64 },
}

/// Lazily filled design matrix over a fixed input sample and function list.
#[derive(Debug)]
pub struct DesignProxy {
    input_sample: Array2<f64>,
    functions: Vec<BasisFunction>,
    columns: Vec<Option<Array1<f64>>>,
    row_scale: Option<Array1<f64>>,
}

impl DesignProxy {
    pub fn new(input_sample: Array2<f64>, functions: Vec<BasisFunction>) -> Self {
        let columns = vec![None; functions.len()];
        Self {
            input_sample,
            functions,
            columns,
            row_scale: None,
        }
    }

    pub fn input_sample(&self) -> ArrayView2<'_, f64> {
        self.input_sample.view()
    }

    pub fn sample_size(&self) -> usize {
        self.input_sample.nrows()
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn functions(&self) -> &[BasisFunction] {
        &self.functions
    }

    pub fn is_cached(&self, rank: usize) -> bool {
        self.columns.get(rank).is_some_and(Option::is_some)
    }

    pub fn cached_count(&self) -> usize {
        self.columns.iter().filter(|c| c.is_some()).count()
    }

    /// Rows of materialised designs are scaled by `√wᵢ` while a weight is
    /// set. `None` clears it.
    pub fn set_weight(&mut self, weight: Option<ArrayView1<f64>>) -> Result<(), DesignError> {
        self.row_scale = match weight {
            None => None,
            Some(w) => {
                if w.len() != self.sample_size() {
                    return Err(DesignError::WeightLength {
                        expected: self.sample_size(),
                        found: w.len(),
                    });
                }
                if let Some((index, &value)) = w
                    .iter()
                    .enumerate()
                    .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
                {
                    return Err(DesignError::InvalidWeight { index, value });
                }
                Some(w.mapv(f64::sqrt))
            }
        };
        Ok(())
    }

    /// Evaluates the missing columns among `ranks`, in parallel.
    pub fn fill(&mut self, ranks: &[usize]) -> Result<(), DesignError> {
        let available = self.functions.len();
        if let Some(&rank) = ranks.iter().find(|&&r| r >= available) {
            return Err(DesignError::RankOutOfRange { rank, available });
        }
        let mut missing: Vec<usize> = ranks.iter().copied().filter(|&r| !self.is_cached(r)).collect();
        missing.sort_unstable();
        missing.dedup();
        if missing.is_empty() {
            return Ok(());
        }
        log::debug!("Evaluating {} design columns", missing.len());
        let sample = &self.input_sample;
        let functions = &self.functions;
        let computed: Vec<(usize, Array1<f64>)> = missing
            .par_iter()
            .map(|&rank| {
                let f = &functions[rank];
                (rank, sample.rows().into_iter().map(|x| f.evaluate(x)).collect())
            })
            .collect();
        for (rank, column) in computed {
            self.columns[rank] = Some(column);
        }
        Ok(())
    }

    /// `Ψ[:, ranks]`, computing and caching any missing column first.
    pub fn compute_design(&mut self, ranks: &[usize]) -> Result<Array2<f64>, DesignError> {
        self.fill(ranks)?;
        self.design(ranks)
    }

    /// `Ψ[:, ranks]` from cached columns only.
    pub fn design(&self, ranks: &[usize]) -> Result<Array2<f64>, DesignError> {
        let mut out = Array2::<f64>::zeros((self.sample_size(), ranks.len()));
        for (j, &rank) in ranks.iter().enumerate() {
            let column = self.column(rank)?;
            match &self.row_scale {
                Some(scale) => out.column_mut(j).assign(&(&column * scale)),
                None => out.column_mut(j).assign(&column),
            }
        }
        Ok(out)
    }

    /// An unweighted cached column.
    pub fn column(&self, rank: usize) -> Result<ArrayView1<'_, f64>, DesignError> {
        match self.columns.get(rank) {
            None => Err(DesignError::RankOutOfRange {
                rank,
                available: self.functions.len(),
            }),
            Some(None) => Err(DesignError::NotCached(rank)),
            Some(Some(column)) => Ok(column.view()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{OrthogonalBasis, OrthogonalProductBasis, PolynomialFamily};
    use crate::enumerate::EnumerateFunction;
    use ndarray::array;

    fn legendre_proxy(size: usize) -> DesignProxy {
        let basis = OrthogonalProductBasis::new(
            vec![PolynomialFamily::Legendre],
            EnumerateFunction::linear(1).unwrap(),
        )
        .unwrap();
        let functions = (0..size).map(|r| basis.build(r).unwrap()).collect();
        DesignProxy::new(array![[-1.0], [0.0], [0.5], [1.0]], functions)
    }

    #[test]
    fn columns_are_cached_once_requested() {
        let mut proxy = legendre_proxy(4);
        assert_eq!(proxy.cached_count(), 0);
        let design = proxy.compute_design(&[2, 0]).unwrap();
        assert_eq!(design.dim(), (4, 2));
        assert_eq!(proxy.cached_count(), 2);
        assert!(proxy.is_cached(2) && !proxy.is_cached(1));
        // Column 0 is the constant.
        assert!(design.column(1).iter().all(|&v| v == 1.0));
        // Legendre p2 at x = 1 is sqrt(5).
        assert!((design[[3, 0]] - 5f64.sqrt()).abs() < 1e-14);
    }

    #[test]
    fn read_only_access_requires_cached_columns() {
        let mut proxy = legendre_proxy(4);
        assert!(matches!(proxy.design(&[1]), Err(DesignError::NotCached(1))));
        proxy.fill(&[1, 1, 3]).unwrap();
        assert_eq!(proxy.cached_count(), 2);
        assert!(proxy.design(&[3, 1]).is_ok());
    }

    #[test]
    fn out_of_range_rank_is_an_error() {
        let mut proxy = legendre_proxy(3);
        match proxy.compute_design(&[0, 3]) {
            Err(DesignError::RankOutOfRange { rank, available }) => {
                assert_eq!(rank, 3);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn weights_scale_rows_without_touching_the_cache() {
        let mut proxy = legendre_proxy(2);
        let plain = proxy.compute_design(&[0, 1]).unwrap();
        proxy.set_weight(Some(array![4.0, 1.0, 0.0, 9.0].view())).unwrap();
        let weighted = proxy.compute_design(&[0, 1]).unwrap();
        assert_eq!(weighted.row(0).to_vec(), vec![2.0, 2.0 * plain[[0, 1]]]);
        assert_eq!(weighted.row(2).to_vec(), vec![0.0, 0.0]);
        proxy.set_weight(None).unwrap();
        assert_eq!(proxy.compute_design(&[0, 1]).unwrap(), plain);

        assert!(matches!(
            proxy.set_weight(Some(array![1.0].view())),
            Err(DesignError::WeightLength { expected: 4, found: 1 })
        ));
        assert!(matches!(
            proxy.set_weight(Some(array![1.0, -1.0, 1.0, 1.0].view())),
            Err(DesignError::InvalidWeight { index: 1, .. })
        ));
    }
}
