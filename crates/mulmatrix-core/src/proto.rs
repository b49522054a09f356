//! Wire types and generated stubs for the `mulmatrix.Worker` gRPC service.
//!
//! The service exposes a single unary procedure, `MulRow`, which multiplies
//! one row vector by a full matrix:
//!
//! ```text
//! MulRowRequest { row: [f64], rows: u64, cols: u64, data: [RowVector] }
//!     -> MulRowReply { values: [f64] }   // len == cols
//! ```
//!
//! Client and server code (`worker_client::WorkerClient`,
//! `worker_server::{Worker, WorkerServer}`) is generated by `build.rs`.

use crate::common::{
    error::{Error, Result},
    matrix::Matrix,
};

include!(concat!(env!("OUT_DIR"), "/mulmatrix.Worker.rs"));

/// One row of the right-hand matrix.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RowVector {
    #[prost(double, repeated, tag = "1")]
    pub values: Vec<f64>,
}

/// Request of `Worker.MulRow`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MulRowRequest {
    /// The row vector to multiply.
    #[prost(double, repeated, tag = "1")]
    pub row: Vec<f64>,
    /// Number of rows of the matrix in `data`.
    #[prost(uint64, tag = "2")]
    pub rows: u64,
    /// Number of columns of the matrix in `data`.
    #[prost(uint64, tag = "3")]
    pub cols: u64,
    /// The matrix, row-major.
    #[prost(message, repeated, tag = "4")]
    pub data: Vec<RowVector>,
}

/// Reply of `Worker.MulRow`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct MulRowReply {
    #[prost(double, repeated, tag = "1")]
    pub values: Vec<f64>,
}

impl MulRowRequest {
    /// Builds the request multiplying `row` by `matrix`.
    pub fn new(row: Vec<f64>, matrix: &Matrix) -> Self {
        Self {
            row,
            rows: matrix.rows() as u64,
            cols: matrix.cols() as u64,
            data: matrix
                .iter_rows()
                .map(|values| RowVector {
                    values: values.to_vec(),
                })
                .collect(),
        }
    }

    /// Splits the request into its row vector and a validated matrix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedInput`] if `rows`/`cols` do not describe
    /// `data`.
    pub fn into_parts(self) -> Result<(Vec<f64>, Matrix)> {
        let rows = to_usize(self.rows, "rows")?;
        let cols = to_usize(self.cols, "cols")?;
        let data = self.data.into_iter().map(|r| r.values).collect();
        Ok((self.row, Matrix::new(rows, cols, data)?))
    }
}

fn to_usize(value: u64, field: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| Error::MalformedInput {
        reason: format!("{field} value {value} does not fit this platform"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn request_survives_the_wire() {
        let b = Matrix::from_rows(vec![vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]])
            .unwrap();
        let req = MulRowRequest::new(vec![1.0, 2.0, 3.0], &b);

        let decoded = MulRowRequest::decode(req.encode_to_vec().as_slice()).unwrap();
        let (row, matrix) = decoded.into_parts().unwrap();

        assert_eq!(row, vec![1.0, 2.0, 3.0]);
        assert_eq!(matrix, b);
    }

    #[test]
    fn inconsistent_dimensions_are_malformed() {
        let req = MulRowRequest {
            row: vec![1.0],
            rows: 2,
            cols: 1,
            data: vec![RowVector { values: vec![1.0] }],
        };
        assert!(matches!(
            req.into_parts(),
            Err(Error::MalformedInput { .. })
        ));
    }
}
