use mulmatrix_core::{
    Error, multiply_row,
    proto::{MulRowReply, MulRowRequest, worker_server::Worker},
};
use tonic::{Request, Response, Status};

/// Stateless implementation of `Worker.MulRow`.
///
/// Each call decodes the row and the matrix, computes their product on the
/// blocking pool and replies with `cols` values.
#[derive(Clone, Copy, Debug, Default)]
pub struct RowMultiplier;

#[tonic::async_trait]
impl Worker for RowMultiplier {
    #[tracing::instrument(skip_all, fields(rows = req.get_ref().rows, cols = req.get_ref().cols))]
    async fn mul_row(&self, req: Request<MulRowRequest>) -> Result<Response<MulRowReply>, Status> {
        let (row, matrix) = req.into_inner().into_parts()?;

        let values = tokio::task::spawn_blocking(move || multiply_row(&row, &matrix))
            .await
            .map_err(|e| Error::ChannelError {
                context: format!("row computation failed: {e}"),
            })??;

        tracing::debug!(len = values.len(), "Row computed");
        Ok(Response::new(MulRowReply { values }))
    }
}
