//! # Pool Constants
//!
//! Limits and defaults shared by the master, its configuration layer and the
//! HTTP surface, so every entry point validates pool sizes the same way.

use crate::common::error::{Error, Result};

/// Smallest accepted worker pool size.
pub const MIN_POOL_SIZE: usize = 1;

/// Largest accepted worker pool size.
pub const MAX_POOL_SIZE: usize = 64;

/// Port assigned to slot 0; slot `i` listens on `BASE_PORT + i * stride`.
pub const DEFAULT_BASE_PORT: u16 = 9000;

/// gRPC service name of the row multiplier, as reported by the health service.
pub const WORKER_SERVICE_NAME: &str = "mulmatrix.Worker";

/// Validates a requested pool size, accepting signed input so that negative
/// values coming from text bodies are reported rather than wrapped.
///
/// # Errors
///
/// Returns [`Error::InvalidPoolSize`] when `requested` is outside
/// `[MIN_POOL_SIZE, MAX_POOL_SIZE]`.
pub fn validate_pool_size(requested: i64) -> Result<usize> {
    match usize::try_from(requested) {
        Ok(size) if (MIN_POOL_SIZE..=MAX_POOL_SIZE).contains(&size) => Ok(size),
        _ => Err(Error::InvalidPoolSize {
            requested,
            min: MIN_POOL_SIZE,
            max: MAX_POOL_SIZE,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds() {
        assert_eq!(validate_pool_size(1), Ok(1));
        assert_eq!(validate_pool_size(64), Ok(64));
    }

    #[test]
    fn rejects_out_of_range() {
        for bad in [0, 65, -1, i64::MAX] {
            assert!(matches!(
                validate_pool_size(bad),
                Err(Error::InvalidPoolSize { requested, .. }) if requested == bad
            ));
        }
    }
}
