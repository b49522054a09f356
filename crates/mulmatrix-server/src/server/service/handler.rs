//! The matrix service: the one object the HTTP layer talks to.
//!
//! [`MatrixService`] ties the [`PoolManager`] and the [`RowDispatcher`]
//! together. Every multiplication works against the pool snapshot published
//! when it starts, so a concurrent resize never changes the workers or the
//! concurrency limit of a call already running.

use crate::server::{
    config::ServerConfig,
    dispatch::RowDispatcher,
    pool::{PoolManager, PoolSnapshot},
    telemetry::{
        decrement_multiplies_inflight, increment_multiplies, increment_multiplies_inflight,
        increment_multiply_errors, record_multiply_duration,
    },
};
use core::time::Duration;
use mulmatrix_core::{Error, Matrix, Result, types::validate_pool_size};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct MatrixService {
    pool: Arc<PoolManager>,
    dispatcher: Arc<RowDispatcher>,
    inflight: Arc<AtomicUsize>,
    shutting_down: Arc<AtomicBool>,
    supervisor: CancellationToken,
    shutdown_timeout: Duration,
}

impl MatrixService {
    /// Builds the service with an empty pool. Call
    /// [`MatrixService::set_num_workers`] to start workers.
    pub fn new(config: &ServerConfig) -> Self {
        Self::from_parts(
            PoolManager::new(config.pool.clone()),
            RowDispatcher::new(config.dispatch.clone()),
            config.shutdown_timeout,
        )
    }

    pub fn from_parts(
        pool: PoolManager,
        dispatcher: RowDispatcher,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            pool: Arc::new(pool),
            dispatcher: Arc::new(dispatcher),
            inflight: Arc::new(AtomicUsize::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
            supervisor: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    pub fn pool(&self) -> &PoolManager {
        &self.pool
    }

    pub fn dispatcher(&self) -> &RowDispatcher {
        &self.dispatcher
    }

    /// Number of multiplications currently running.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Computes `a * b` on the current pool.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] once [`MatrixService::shutdown`] started.
    /// - Any error of [`RowDispatcher::multiply`].
    pub async fn multiply(&self, a: Matrix, b: Matrix) -> Result<Matrix> {
        let _guard = self.enter()?;
        let start = std::time::Instant::now();
        increment_multiplies();
        increment_multiplies_inflight();

        let snapshot = self.pool.snapshot();
        let result = self.dispatcher.multiply(&snapshot, &a, Arc::new(b)).await;
        decrement_multiplies_inflight();

        match &result {
            Ok(product) => {
                record_multiply_duration(start.elapsed().as_secs_f64() * 1000.0);
                tracing::debug!(shape = %product.shape(), "Multiplication complete");
            }
            Err(e) => {
                increment_multiply_errors();
                tracing::warn!("Multiplication failed: {e}");
            }
        }
        result
    }

    /// Resizes the pool to `requested` workers and returns the new size.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPoolSize`] if `requested` is outside `[1, 64]`. The
    ///   pool is left unchanged.
    /// - [`Error::ProcessSpawn`] if growth failed. The pool is left unchanged.
    /// - [`Error::ServiceShutdown`] once shutdown started.
    pub async fn set_num_workers(&self, requested: i64) -> Result<usize> {
        let _guard = self.enter()?;
        let size = validate_pool_size(requested)?;
        self.pool.resize(size).await?;
        self.dispatcher.forget_stale(&self.pool.snapshot());
        Ok(size)
    }

    pub fn workers(&self) -> Arc<PoolSnapshot> {
        self.pool.snapshot()
    }

    /// Spawns the background task that restarts or excludes dead workers.
    pub fn start_supervisor(&self) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.pool).run_supervisor(self.supervisor.clone()))
    }

    /// Stops the service.
    ///
    /// - New requests are refused with [`Error::ServiceShutdown`].
    /// - In-flight requests get up to `shutdown_timeout` to finish.
    /// - The supervisor is stopped and every worker is terminated.
    pub async fn shutdown(&self) {
        tracing::info!("Refusing new requests");
        self.shutting_down.store(true, Ordering::Release);

        tracing::info!("Draining in-flight requests ({} active)", self.inflight());
        let drained = timeout(self.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;

        match drained {
            Ok(()) => tracing::debug!("All in-flight requests drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} requests still active)",
                self.inflight()
            ),
        }

        self.supervisor.cancel();
        self.pool.shutdown().await;
        self.dispatcher.forget_stale(&self.pool.snapshot());
    }

    fn enter(&self) -> Result<InflightGuard> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        Ok(InflightGuard(Arc::clone(&self.inflight)))
    }
}

struct InflightGuard(Arc<AtomicUsize>);

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
