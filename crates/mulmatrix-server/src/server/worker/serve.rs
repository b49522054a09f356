use super::service::RowMultiplier;
use core::future::Future;
use futures::Stream;
use mulmatrix_core::proto::worker_server::WorkerServer;
use tokio::io::{AsyncRead, AsyncWrite};
use tonic::transport::{Server, server::Connected};

/// Builds the `Worker` service with both message limits set to
/// `max_message_bytes`.
pub fn worker_service(max_message_bytes: usize) -> WorkerServer<RowMultiplier> {
    WorkerServer::new(RowMultiplier)
        .max_decoding_message_size(max_message_bytes)
        .max_encoding_message_size(max_message_bytes)
}

/// Serves `Worker.MulRow` and the gRPC health service on `incoming` until
/// `shutdown` resolves.
///
/// The health status of `mulmatrix.Worker` is `SERVING` while the server runs
/// and flips to `NOT_SERVING` as soon as `shutdown` resolves, before open
/// connections are drained.
pub async fn serve_worker<I, IO, IE, F>(
    incoming: I,
    max_message_bytes: usize,
    shutdown: F,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
    F: Future<Output = ()>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<WorkerServer<RowMultiplier>>()
        .await;

    let signal = async move {
        shutdown.await;
        tracing::info!("Shutdown signal received, draining connections");
        health_reporter
            .set_not_serving::<WorkerServer<RowMultiplier>>()
            .await;
    };

    Server::builder()
        .tcp_nodelay(true)
        .add_service(health_service)
        .add_service(worker_service(max_message_bytes))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?;

    tracing::info!("Worker shut down");
    Ok(())
}
