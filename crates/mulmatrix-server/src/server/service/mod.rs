//! Request handling shared by every front end.
//!
//! ## Structure
//!
//! - [`handler`] - the [`MatrixService`](handler::MatrixService) facade over
//!   the worker pool and the row dispatcher.

pub mod handler;
