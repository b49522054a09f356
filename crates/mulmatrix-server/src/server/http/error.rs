use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mulmatrix_core::Error;

/// [`Error`] rendered as a plain-text HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            Error::MalformedInput { .. } | Error::InvalidPoolSize { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::NoWorkers | Error::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Error::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::DimensionMismatch { .. }
            | Error::RemoteCall { .. }
            | Error::ProcessSpawn { .. }
            | Error::RequestCancelled
            | Error::ChannelError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, "{}", self.0);
        } else {
            tracing::debug!(%status, "{}", self.0);
        }
        (status, format!("{}\n", self.0)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mulmatrix_core::Shape;

    #[test]
    fn client_errors_map_to_400() {
        let malformed = ApiError(Error::MalformedInput {
            reason: "bad".into(),
        });
        let pool_size = ApiError(Error::InvalidPoolSize {
            requested: 0,
            min: 1,
            max: 64,
        });
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(pool_size.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn dimension_mismatch_is_a_server_error() {
        let err = ApiError(Error::DimensionMismatch {
            lhs: Shape::new(2, 3),
            rhs: Shape::new(2, 2),
        });
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn availability_errors() {
        assert_eq!(
            ApiError(Error::NoWorkers).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(Error::DeadlineExceeded {
                endpoint: "127.0.0.1:9000".into(),
                timeout_ms: 10,
            })
            .status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
