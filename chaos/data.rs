//! # CSV samples
//!
//! Samples enter and leave the command line as comma-separated files with a
//! header row and one observation per line. Every cell must parse as a
//! finite number; anything else is reported with its line and column so the
//! user can fix the file.

use ndarray::{Array1, Array2};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("The file '{0}' contains no data rows.")]
    Empty(String),

    #[error("Line {line} has {found} fields, but the header declares {expected}.")]
    RaggedRow {
        line: u64,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}, column '{column}': '{value}' is not a number.")]
    NotNumeric {
        line: u64,
        column: String,
        value: String,
    },

    #[error("Line {line}, column '{column}': non-finite values are not allowed.")]
    NonFinite { line: u64, column: String },

    #[error("A weights file must have exactly one column, found {0}.")]
    WeightColumns(usize),

    #[error("Header has {header} names but the table has {columns} columns.")]
    HeaderWidth { header: usize, columns: usize },
}

/// A numeric table read from CSV.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    /// Shape: `[rows, columns.len()]`.
    pub values: Array2<f64>,
}

/// Reads a headed, all-numeric CSV file.
pub fn load_table(path: impl AsRef<Path>) -> Result<Table, DataError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut values = Vec::new();
    let mut rows = 0;
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != columns.len() {
            return Err(DataError::RaggedRow {
                line,
                expected: columns.len(),
                found: record.len(),
            });
        }
        for (field, column) in record.iter().zip(&columns) {
            let value: f64 = field.parse().map_err(|_| DataError::NotNumeric {
                line,
                column: column.clone(),
                value: field.to_string(),
            })?;
            if !value.is_finite() {
                return Err(DataError::NonFinite {
                    line,
                    column: column.clone(),
                });
            }
            values.push(value);
        }
        rows += 1;
    }
    if rows == 0 {
        return Err(DataError::Empty(path.display().to_string()));
    }
    let values = Array2::from_shape_vec((rows, columns.len()), values)?;
    log::info!(
        "Loaded {} rows x {} columns from '{}'",
        rows,
        columns.len(),
        path.display()
    );
    Ok(Table { columns, values })
}

/// Reads a sample, dropping the column names.
pub fn load_sample(path: impl AsRef<Path>) -> Result<Array2<f64>, DataError> {
    load_table(path).map(|table| table.values)
}

/// Reads a single-column weights file.
pub fn load_weights(path: impl AsRef<Path>) -> Result<Array1<f64>, DataError> {
    let table = load_table(path)?;
    if table.columns.len() != 1 {
        return Err(DataError::WeightColumns(table.columns.len()));
    }
    Ok(table.values.column(0).to_owned())
}

/// Writes `values` under `header`, full precision.
pub fn write_table(
    path: impl AsRef<Path>,
    header: &[String],
    values: &Array2<f64>,
) -> Result<(), DataError> {
    if header.len() != values.ncols() {
        return Err(DataError::HeaderWidth {
            header: header.len(),
            columns: values.ncols(),
        });
    }
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(header)?;
    for row in values.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}
