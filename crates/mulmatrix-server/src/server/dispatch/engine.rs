//! Row-partitioned multiplication across the worker pool.
//!
//! [`RowDispatcher::multiply`] computes `A * B` by sending every row of `A`,
//! together with the whole of `B`, to a worker. Rows run as independent tokio
//! tasks; a semaphore sized to the pool's concurrency limit bounds how many
//! remote calls are outstanding at once.
//!
//! ## Failure model
//!
//! The first failing row cancels a token shared by every row of the call. No
//! new rows are issued, in-flight rows are abandoned, and the caller gets that
//! single error. A partially filled output matrix is never returned.

use super::{connections::ConnectionCache, task::RowTask};
use crate::server::{
    config::DispatchConfig,
    pool::PoolSnapshot,
    telemetry::{RowInFlight, increment_row_errors, increment_rows_dispatched},
};
use mulmatrix_core::{Error, Matrix, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{sync::Semaphore, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub struct RowDispatcher {
    config: DispatchConfig,
    connections: ConnectionCache,
}

impl RowDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            connections: ConnectionCache::new(config.clone()),
            config,
        }
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub const fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    /// Drops cached connections to workers that are no longer routable.
    pub fn forget_stale(&self, pool: &PoolSnapshot) {
        self.connections
            .retain(|endpoint| pool.routable().contains(endpoint));
    }

    /// Multiplies `a` by `b` using the workers of `pool`.
    ///
    /// Row `i` is sent to `pool.endpoint_for_row(i)`. At most
    /// `pool.concurrency_limit()` rows are in flight at any time.
    ///
    /// # Errors
    ///
    /// - [`Error::DimensionMismatch`] if `a.cols() != b.rows()`; nothing is
    ///   dispatched.
    /// - [`Error::NoWorkers`] if `pool` has no running worker.
    /// - The first row failure ([`Error::RemoteCall`],
    ///   [`Error::DeadlineExceeded`], ...), after every other row of the call
    ///   has been cancelled.
    #[tracing::instrument(skip_all, fields(lhs = %a.shape(), rhs = %b.shape(), workers = pool.routable().len()))]
    pub async fn multiply(&self, pool: &PoolSnapshot, a: &Matrix, b: Arc<Matrix>) -> Result<Matrix> {
        a.ensure_multipliable(&b)?;
        if pool.routable().is_empty() {
            return Err(Error::NoWorkers);
        }

        let output = Arc::new(Mutex::new(Matrix::zeros(a.rows(), b.cols())));
        let permits = Arc::new(Semaphore::new(pool.concurrency_limit().max(1)));
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (index, row) in a.iter_rows().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => {
                    permit.map_err(|e| Error::ChannelError {
                        context: format!("row semaphore closed: {e}"),
                    })?
                }
            };

            let endpoint = pool.endpoint_for_row(index).ok_or(Error::NoWorkers)?;
            let client = self.connections.client(endpoint)?;
            let task = RowTask {
                index,
                row: row.to_vec(),
                target: Arc::clone(&b),
                endpoint,
            };
            let output = Arc::clone(&output);
            let cancel = cancel.clone();
            let deadline = self.config.call_timeout;

            increment_rows_dispatched();
            let span = tracing::debug_span!("row", index, %endpoint);
            tasks.spawn(
                async move {
                    let _permit = permit;
                    let _inflight = RowInFlight::enter();

                    let result = tokio::select! {
                        () = cancel.cancelled() => Err(Error::RequestCancelled),
                        values = task.call(client, deadline) => {
                            values.and_then(|values| output.lock().set_row(index, values))
                        }
                    };

                    if let Err(e) = &result {
                        if *e != Error::RequestCancelled {
                            cancel.cancel();
                        }
                    }
                    result.map_err(|e| (index, e))
                }
                .instrument(span),
            );
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok(Ok(())) => continue,
                Ok(Err((_, Error::RequestCancelled))) => continue,
                Err(join_err) if join_err.is_cancelled() => continue,
                Ok(Err((index, e))) => {
                    tracing::warn!(row = index, "Row failed, cancelling the remaining rows: {e}");
                    e
                }
                Err(join_err) => Error::ChannelError {
                    context: format!("row task failed: {join_err}"),
                },
            };

            increment_row_errors();
            if first_error.is_none() {
                cancel.cancel();
                tasks.abort_all();
                first_error = Some(failure);
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(Error::RequestCancelled);
        }

        let output = Arc::try_unwrap(output).map_err(|_| Error::ChannelError {
            context: "output matrix still shared after all rows completed".to_string(),
        })?;
        Ok(output.into_inner())
    }
}
