//! Public HTTP API of the master.
//!
//! - `POST /mulmatrix`: `{"matrixA": [[f64]], "matrixB": [[f64]]}` in, the
//!   product as `[[f64]]` out.
//! - `POST /setnumworkers`: a decimal integer in, `Number of workers set to N`
//!   out.
//! - `POST /matrix`: same body as `/mulmatrix`, echoed back without
//!   computation.
//! - `GET /workers`: the pool snapshot as JSON.
//!
//! Any other method on these paths is answered with `405`.

use super::error::ApiError;
use crate::server::{pool::PoolSnapshot, service::handler::MatrixService};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
};
use bytes::Bytes;
use mulmatrix_core::{Error, Matrix};
use serde::{Deserialize, de::DeserializeOwned};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Request body of `/mulmatrix` and `/matrix`.
#[derive(Debug, Deserialize)]
pub struct MatrixData {
    #[serde(rename = "matrixA")]
    pub matrix_a: Vec<Vec<f64>>,
    #[serde(rename = "matrixB")]
    pub matrix_b: Vec<Vec<f64>>,
}

/// Builds the API router. Request bodies larger than `body_limit` bytes are
/// rejected with `413`.
pub fn router(service: MatrixService, body_limit: usize) -> Router {
    Router::new()
        .route("/mulmatrix", post(mul_matrix))
        .route("/setnumworkers", post(set_num_workers))
        .route("/matrix", post(echo_matrix))
        .route("/workers", get(workers))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(service)
}

async fn mul_matrix(
    State(service): State<MatrixService>,
    body: Bytes,
) -> Result<Json<Vec<Vec<f64>>>, ApiError> {
    let data: MatrixData = parse_json(&body)?;
    let a = Matrix::from_rows(data.matrix_a)?;
    let b = Matrix::from_rows(data.matrix_b)?;

    let product = service.multiply(a, b).await?;
    Ok(Json(product.into_rows()))
}

async fn set_num_workers(
    State(service): State<MatrixService>,
    body: Bytes,
) -> Result<String, ApiError> {
    let requested = core::str::from_utf8(&body)
        .ok()
        .and_then(|text| text.trim().parse::<i64>().ok())
        .ok_or_else(|| Error::MalformedInput {
            reason: "Invalid value for numWorkers".to_string(),
        })?;

    let size = service.set_num_workers(requested).await?;
    Ok(format!("Number of workers set to {size}\n"))
}

async fn echo_matrix(body: Bytes) -> Result<String, ApiError> {
    let data: MatrixData = parse_json(&body)?;
    Ok(format!(
        "Received matrix A: {:?}\nReceived matrix B: {:?}\n",
        data.matrix_a, data.matrix_b
    ))
}

async fn workers(State(service): State<MatrixService>) -> Json<PoolSnapshot> {
    Json(PoolSnapshot::clone(&service.workers()))
}

fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError(Error::MalformedInput {
            reason: format!("Invalid JSON: {e}"),
        })
    })
}
