pub mod error;
pub mod matrix;
pub mod row;
pub mod types;

pub use error::{Error, Result};
pub use matrix::{Matrix, Shape};
pub use row::multiply_row;
