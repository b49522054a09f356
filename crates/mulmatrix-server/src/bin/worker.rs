use anyhow::Context;
use clap::Parser;
use mulmatrix_server::server::{
    config::WorkerArgs, signal::shutdown_signal, telemetry::init_worker_logging,
    worker::serve_worker,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = WorkerArgs::parse();
    init_worker_logging()?;

    let addr = SocketAddr::new(args.host, args.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("Worker listening on {addr}");

    serve_worker(
        TcpListenerStream::new(listener),
        args.max_message_bytes,
        shutdown_signal(),
    )
    .await
}
