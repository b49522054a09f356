use crate::common::{
    error::{Error, Result},
    matrix::Matrix,
};

/// Multiplies the row vector `row` by `matrix`.
///
/// Returns a vector of `matrix.cols()` values where entry `j` is
/// `Σ_t row[t] * matrix[t][j]`. Terms are accumulated in ascending `t` so the
/// result is bit-for-bit reproducible regardless of which worker computes it.
///
/// # Errors
///
/// Returns [`Error::MalformedInput`] if `row.len() != matrix.rows()`.
pub fn multiply_row(row: &[f64], matrix: &Matrix) -> Result<Vec<f64>> {
    if row.len() != matrix.rows() {
        return Err(Error::MalformedInput {
            reason: format!(
                "row has {} values but the matrix has {} rows",
                row.len(),
                matrix.rows()
            ),
        });
    }

    let mut out = vec![0.0; matrix.cols()];
    for (&scale, b_row) in row.iter().zip(matrix.iter_rows()) {
        for (acc, &b) in out.iter_mut().zip(b_row) {
            *acc += scale * b;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b() -> Matrix {
        Matrix::from_rows(vec![vec![7.0, 8.0], vec![9.0, 10.0], vec![11.0, 12.0]]).unwrap()
    }

    #[test]
    fn multiplies_rows_of_the_reference_product() {
        assert_eq!(multiply_row(&[1.0, 2.0, 3.0], &b()).unwrap(), vec![58.0, 64.0]);
        assert_eq!(
            multiply_row(&[4.0, 5.0, 6.0], &b()).unwrap(),
            vec![139.0, 154.0]
        );
    }

    #[test]
    fn matches_naive_sum_on_fractional_values() {
        let m = Matrix::from_rows(vec![
            vec![0.1, -2.5, 3.25, 1e-3],
            vec![4.0, 0.5, -0.75, 8.0],
            vec![1.5, 1.5, 1.5, -1.5],
        ])
        .unwrap();
        let row = [0.3, -1.2, 2.0];

        let got = multiply_row(&row, &m).unwrap();
        for (j, value) in got.iter().enumerate() {
            let mut expected = 0.0;
            for (t, r) in row.iter().enumerate() {
                expected += r * m.as_rows()[t][j];
            }
            assert_eq!(value.to_bits(), expected.to_bits(), "column {j}");
        }
    }

    #[test]
    fn rejects_row_of_wrong_length() {
        let err = multiply_row(&[1.0, 2.0], &b()).unwrap_err();
        assert_eq!(
            err,
            Error::MalformedInput {
                reason: "row has 2 values but the matrix has 3 rows".to_string()
            }
        );
    }
}
