use anyhow::Context;
use clap::Parser;
use mulmatrix_server::server::{
    config::{CliArgs, ServerConfig},
    http::router,
    service::handler::MatrixService,
    signal::shutdown_signal,
    telemetry::init_telemetry,
};
use tokio::net::TcpListener;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let service = MatrixService::new(&config);
    if let Err(e) = service
        .set_num_workers(i64::try_from(config.num_workers)?)
        .await
    {
        service.shutdown().await;
        providers.shutdown();
        return Err(e).context("failed to start the worker pool");
    }
    let supervisor = service.start_supervisor();

    let listener = TcpListener::bind(&config.server_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server_addr))?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    let app = router(service.clone(), config.pool.max_message_bytes);
    let shutdown = {
        let service = service.clone();
        async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, terminating gracefully...");
            service.shutdown().await;
        }
    };

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;

    if let Err(e) = supervisor.await {
        tracing::error!("Supervisor task failed: {e}");
    }
    tracing::info!("Service shut down successfully");
    providers.shutdown();

    served.context("HTTP server failed")
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting matrix service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting matrix service on {} with {} workers",
            config.server_addr,
            config.num_workers
        );
    }
}
