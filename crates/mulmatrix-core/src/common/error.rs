//! Error types shared by the master, the workers and the HTTP surface.
//!
//! This module defines the central [`Error`] enum. It implements
//! `From<Error>` for [`tonic::Status`] so worker-side failures travel back to
//! the master with a meaningful gRPC status code.
//!
//! ## Error Cases
//! - `DimensionMismatch`: the operands of a product have incompatible shapes.
//! - `MalformedInput`: a matrix, row or request body could not be decoded.
//! - `InvalidPoolSize`: a resize asked for a pool size outside `[1, 64]`.
//! - `RemoteCall`: a worker could not be reached or answered with an error.
//! - `DeadlineExceeded`: a worker did not answer within the call deadline.
//! - `ProcessSpawn`: a worker process could not be started.
//! - `NoWorkers`: the pool currently has no routable worker.
//! - `RequestCancelled`: the work was abandoned after a sibling failure.
//! - `ChannelError`: an internal synchronisation primitive failed.
//! - `ServiceShutdown`: a request arrived while the service was shutting down.

use crate::common::matrix::Shape;
use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the matrix multiplication service.
#[derive(Clone, thiserror::Error, Debug, PartialEq)]
pub enum Error {
    /// `lhs.cols != rhs.rows`.
    #[error("incompatible matrix dimensions: {lhs} and {rhs}")]
    DimensionMismatch { lhs: Shape, rhs: Shape },

    /// The input could not be decoded into a well-formed matrix or value.
    #[error("Malformed input: {reason}")]
    MalformedInput { reason: String },

    /// The requested pool size is outside the accepted range.
    #[error("Invalid pool size {requested}: must be between {min} and {max}")]
    InvalidPoolSize {
        requested: i64,
        min: usize,
        max: usize,
    },

    /// Transport failure, non-OK status, or malformed reply from a worker.
    #[error("Remote call to {endpoint} failed: {reason}")]
    RemoteCall { endpoint: String, reason: String },

    /// The worker did not answer before the call deadline.
    #[error("Remote call to {endpoint} exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { endpoint: String, timeout_ms: u64 },

    /// A worker process failed to start or never became reachable.
    #[error("Failed to start worker for slot {slot}: {reason}")]
    ProcessSpawn { slot: usize, reason: String },

    /// No worker in the pool is currently able to take work.
    #[error("No running workers available")]
    NoWorkers,

    /// The work was cancelled before it completed.
    #[error("Request cancelled")]
    RequestCancelled,

    /// Internal channel, semaphore or task failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::DimensionMismatch { .. } | Error::MalformedInput { .. } => {
                Status::invalid_argument(err.to_string())
            }
            Error::InvalidPoolSize { .. } => Status::out_of_range(err.to_string()),
            Error::RemoteCall { .. } | Error::NoWorkers | Error::ServiceShutdown => {
                Status::unavailable(err.to_string())
            }
            Error::DeadlineExceeded { .. } => Status::deadline_exceeded(err.to_string()),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ProcessSpawn { .. } | Error::ChannelError { .. } => {
                Status::internal(err.to_string())
            }
        }
    }
}
