//! Dense row-major matrix value object.
//!
//! A [`Matrix`] always satisfies `data.len() == rows` and every row holds
//! exactly `cols` values. Matrices built from caller input through
//! [`Matrix::from_rows`] are additionally non-empty.

use crate::common::error::{Error, Result};
use core::fmt;

/// Dimensions of a matrix, displayed as `RxC`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub const fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<Vec<f64>>,
}

impl Matrix {
    /// Builds a matrix with explicit dimensions, checking them against `data`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if the number of rows or the length of
    /// any row disagrees with `rows`/`cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<Vec<f64>>) -> Result<Self> {
        if data.len() != rows {
            return Err(Error::MalformedInput {
                reason: format!("expected {rows} rows, got {}", data.len()),
            });
        }
        if let Some((i, row)) = data.iter().enumerate().find(|(_, r)| r.len() != cols) {
            return Err(Error::MalformedInput {
                reason: format!("row {i} has {} values, expected {cols}", row.len()),
            });
        }
        Ok(Self { rows, cols, data })
    }

    /// Builds a matrix from decoded row-major data, inferring its shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if `data` is empty, its first row is
    /// empty, or the rows are ragged.
    pub fn from_rows(data: Vec<Vec<f64>>) -> Result<Self> {
        let cols = match data.first() {
            None => {
                return Err(Error::MalformedInput {
                    reason: "matrix has no rows".to_string(),
                });
            }
            Some(first) if first.is_empty() => {
                return Err(Error::MalformedInput {
                    reason: "matrix has no columns".to_string(),
                });
            }
            Some(first) => first.len(),
        };
        Self::new(data.len(), cols, data)
    }

    /// Allocates a `rows x cols` matrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows],
        }
    }

    pub const fn rows(&self) -> usize {
        self.rows
    }

    pub const fn cols(&self) -> usize {
        self.cols
    }

    pub const fn shape(&self) -> Shape {
        Shape::new(self.rows, self.cols)
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.data.get(index).map(Vec::as_slice)
    }

    pub fn iter_rows(&self) -> impl ExactSizeIterator<Item = &[f64]> {
        self.data.iter().map(Vec::as_slice)
    }

    pub fn as_rows(&self) -> &[Vec<f64>] {
        &self.data
    }

    pub fn into_rows(self) -> Vec<Vec<f64>> {
        self.data
    }

    /// Checks that `self * rhs` is defined.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DimensionMismatch`] carrying both shapes when
    /// `self.cols() != rhs.rows()`.
    pub fn ensure_multipliable(&self, rhs: &Self) -> Result<()> {
        if self.cols == rhs.rows {
            Ok(())
        } else {
            Err(Error::DimensionMismatch {
                lhs: self.shape(),
                rhs: rhs.shape(),
            })
        }
    }

    /// Replaces row `index` with `values`.
    ///
    /// This is the only mutation path; the dispatch engine uses it to assemble
    /// an output matrix one row at a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if `index` is out of range or `values`
    /// does not hold exactly `cols` entries.
    pub fn set_row(&mut self, index: usize, values: Vec<f64>) -> Result<()> {
        if values.len() != self.cols {
            return Err(Error::MalformedInput {
                reason: format!(
                    "row {index} has {} values, expected {}",
                    values.len(),
                    self.cols
                ),
            });
        }
        let slot = self.data.get_mut(index).ok_or_else(|| Error::MalformedInput {
            reason: format!("row index {index} out of range for {} rows", self.rows),
        })?;
        *slot = values;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_rows_infers_shape() {
        let m = Matrix::from_rows(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(m.shape(), Shape::new(2, 3));
        assert_eq!(m.row(1), Some(&[4.0, 5.0, 6.0][..]));
        assert_eq!(m.row(2), None);
    }

    #[test]
    fn from_rows_rejects_ragged_rows() {
        let err = Matrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, Error::MalformedInput { .. }));
        assert!(err.to_string().contains("row 1 has 1 values, expected 2"));
    }

    #[test]
    fn from_rows_rejects_empty_input() {
        assert!(matches!(
            Matrix::from_rows(vec![]),
            Err(Error::MalformedInput { .. })
        ));
        assert!(matches!(
            Matrix::from_rows(vec![vec![]]),
            Err(Error::MalformedInput { .. })
        ));
    }

    #[test]
    fn new_checks_declared_row_count() {
        let err = Matrix::new(3, 1, vec![vec![1.0], vec![2.0]]).unwrap_err();
        assert!(err.to_string().contains("expected 3 rows, got 2"));
    }

    #[test]
    fn ensure_multipliable_reports_shapes() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 2);
        assert_eq!(
            a.ensure_multipliable(&b),
            Err(Error::DimensionMismatch {
                lhs: Shape::new(2, 3),
                rhs: Shape::new(2, 2),
            })
        );
        assert!(a.ensure_multipliable(&Matrix::zeros(3, 5)).is_ok());
    }

    #[test]
    fn set_row_validates_length_and_index() {
        let mut m = Matrix::zeros(2, 2);
        m.set_row(1, vec![7.0, 8.0]).unwrap();
        assert_eq!(m.as_rows(), &[vec![0.0, 0.0], vec![7.0, 8.0]]);

        assert!(m.set_row(0, vec![1.0]).is_err());
        assert!(m.set_row(2, vec![1.0, 2.0]).is_err());
        assert_eq!(m.row(0), Some(&[0.0, 0.0][..]));
    }
}
