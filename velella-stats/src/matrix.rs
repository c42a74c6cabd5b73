//! Dense real-valued matrices.
//!
//! A thin owner around row-major `Vec<Vec<f64>>` storage. The jump-process
//! tables and bivariate distributions hold many of these and repeatedly
//! resize, scale, and sum them, so the common operations live here rather
//! than on raw vectors.

use std::ops::{Index, IndexMut};

use velella_core::{Result, VelellaError};

/// A dense `nrows x ncols` matrix of `f64`, indexable as `m[i][j]`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matrix {
    data: Vec<Vec<f64>>,
    ncols: usize,
}

impl Matrix {
    /// Create an `nrows x ncols` matrix filled with zeros.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            data: vec![vec![0.0; ncols]; nrows],
            ncols,
        }
    }

    /// Create a matrix from pre-built rows.
    ///
    /// All rows must have the same length and there must be at least one row.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let ncols = match rows.first() {
            Some(r) => r.len(),
            None => {
                return Err(VelellaError::InvalidInput(
                    "matrix must have at least one row".into(),
                ))
            }
        };
        if let Some(bad) = rows.iter().find(|r| r.len() != ncols) {
            return Err(VelellaError::InvalidInput(format!(
                "ragged matrix: row of length {} (expected {})",
                bad.len(),
                ncols
            )));
        }
        Ok(Self { data: rows, ncols })
    }

    /// Number of rows.
    pub fn nrows(&self) -> usize {
        self.data.len()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Read-only view of the rows.
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.data
    }

    /// Sum of all entries.
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|r| r.iter().sum::<f64>()).sum()
    }

    /// Multiply every entry by `s`.
    pub fn scale(&mut self, s: f64) {
        for row in &mut self.data {
            for v in row.iter_mut() {
                *v *= s;
            }
        }
    }

    /// Resize in place to `nrows x ncols`.
    ///
    /// New entries are zero; truncation drops the trailing rows/columns.
    pub fn resize(&mut self, nrows: usize, ncols: usize) {
        self.data.resize_with(nrows, || vec![0.0; ncols]);
        for row in &mut self.data {
            row.resize(ncols, 0.0);
        }
        self.ncols = ncols;
    }

    /// Set every entry to zero without changing the shape.
    pub fn fill_zero(&mut self) {
        for row in &mut self.data {
            for v in row.iter_mut() {
                *v = 0.0;
            }
        }
    }
}

impl Index<usize> for Matrix {
    type Output = [f64];

    fn index(&self, row: usize) -> &Self::Output {
        &self.data[row]
    }
}

impl IndexMut<usize> for Matrix {
    fn index_mut(&mut self, row: usize) -> &mut Self::Output {
        &mut self.data[row]
    }
}
