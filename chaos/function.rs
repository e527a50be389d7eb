//! Vector-valued functions of a point, the shape every surrogate takes.

use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use thiserror::Error;

use crate::distribution::DistributionError;

#[derive(Error, Debug)]
pub enum FunctionError {
    #[error("Input has dimension {found}, expected {expected}.")]
    InputDimension { expected: usize, found: usize },

    #[error("Input transformation failed: {0}")]
    Transformation(#[from] DistributionError),
}

/// `ℝⁿ → ℝᵐ`.
pub trait VectorFunction: Send + Sync {
    fn input_dimension(&self) -> usize;

    fn output_dimension(&self) -> usize;

    fn evaluate(&self, x: ArrayView1<f64>) -> Result<Array1<f64>, FunctionError>;

    /// Row-wise evaluation, parallel over the rows of `sample`.
    fn evaluate_sample(&self, sample: ArrayView2<f64>) -> Result<Array2<f64>, FunctionError> {
        if sample.ncols() != self.input_dimension() {
            return Err(FunctionError::InputDimension {
                expected: self.input_dimension(),
                found: sample.ncols(),
            });
        }
        let mut out = Array2::zeros((sample.nrows(), self.output_dimension()));
        let rows: Vec<Result<Array1<f64>, FunctionError>> = sample
            .outer_iter()
            .into_par_iter()
            .map(|x| self.evaluate(x))
            .collect();
        for (mut dst, src) in out.outer_iter_mut().zip(rows) {
            dst.assign(&src?);
        }
        Ok(out)
    }
}

pub(crate) fn check_input(expected: usize, x: ArrayView1<f64>) -> Result<(), FunctionError> {
    if x.len() != expected {
        return Err(FunctionError::InputDimension {
            expected,
            found: x.len(),
        });
    }
    Ok(())
}

/// Evaluates `f` on every row of `sample` into a fresh matrix of
/// `width` columns, in parallel.
pub(crate) fn map_rows<F>(sample: ArrayView2<f64>, width: usize, f: F) -> Array2<f64>
where
    F: Fn(ArrayView1<f64>) -> Array1<f64> + Sync + Send,
{
    let mut out = Array2::zeros((sample.nrows(), width));
    Zip::from(out.rows_mut())
        .and(sample.rows())
        .par_for_each(|mut dst, src| dst.assign(&f(src)));
    out
}
