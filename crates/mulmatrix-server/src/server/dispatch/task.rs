use core::time::Duration;
use mulmatrix_core::{
    Error, Matrix, Result,
    proto::{MulRowRequest, worker_client::WorkerClient},
};
use std::{net::SocketAddr, sync::Arc};
use tonic::{Code, Request, transport::Channel};

/// One row of a multiplication, bound for one worker.
///
/// Created once per dispatched row and consumed by [`RowTask::call`].
pub struct RowTask {
    pub index: usize,
    pub row: Vec<f64>,
    pub target: Arc<Matrix>,
    pub endpoint: SocketAddr,
}

impl RowTask {
    /// Issues `Worker.MulRow` for this row and validates the reply.
    ///
    /// The deadline is enforced locally and also sent to the worker as the
    /// gRPC `grpc-timeout` header.
    ///
    /// # Errors
    ///
    /// - [`Error::DeadlineExceeded`] if no reply arrives within `deadline`.
    /// - [`Error::RemoteCall`] on transport failure, a non-OK status, or a
    ///   reply whose length differs from the target's column count.
    pub async fn call(
        self,
        mut client: WorkerClient<Channel>,
        deadline: Duration,
    ) -> Result<Vec<f64>> {
        let endpoint = self.endpoint.to_string();
        let cols = self.target.cols();

        let mut request = Request::new(MulRowRequest::new(self.row, &self.target));
        request.set_timeout(deadline);

        let reply = match tokio::time::timeout(deadline, client.mul_row(request)).await {
            Ok(Ok(reply)) => reply.into_inner(),
            Ok(Err(status)) if status.code() == Code::DeadlineExceeded => {
                return Err(Error::DeadlineExceeded {
                    endpoint,
                    timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                });
            }
            Ok(Err(status)) => {
                return Err(Error::RemoteCall {
                    endpoint,
                    reason: format!("{:?}: {}", status.code(), status.message()),
                });
            }
            Err(_) => {
                return Err(Error::DeadlineExceeded {
                    endpoint,
                    timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        if reply.values.len() != cols {
            return Err(Error::RemoteCall {
                endpoint,
                reason: format!(
                    "reply for row {} has {} values, expected {cols}",
                    self.index,
                    reply.values.len()
                ),
            });
        }

        Ok(reply.values)
    }
}
