//! Resizable pool of worker processes.
//!
//! This module defines the [`PoolManager`], the single owner of the worker
//! registry and of the concurrency limit that bounds every multiplication.
//!
//! Resize and shutdown are serialised behind an async mutex because growth
//! awaits process startup. Supervision only takes that lock to read and to
//! apply results; health probes and respawns run without it. Readers never
//! take the lock: after each mutation the manager publishes an immutable
//! [`PoolSnapshot`] that callers clone out of a short-lived read lock.

use super::{
    snapshot::PoolSnapshot,
    worker::{PROBE_TIMEOUT, WorkerRecord, WorkerState, probe_health},
};
use crate::server::{
    config::PoolConfig,
    telemetry::{increment_pool_resizes, record_pool_size},
};
use futures::future::join_all;
use mulmatrix_core::{Error, Result, types::validate_pool_size};
use parking_lot::RwLock;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Registry {
    workers: Vec<WorkerRecord>,
    concurrency_limit: usize,
}

pub struct PoolManager {
    config: PoolConfig,
    registry: Mutex<Registry>,
    published: RwLock<Arc<PoolSnapshot>>,
}

impl PoolManager {
    /// Creates an empty pool. Call [`PoolManager::resize`] to start workers.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            registry: Mutex::new(Registry::default()),
            published: RwLock::new(Arc::new(PoolSnapshot::default())),
        }
    }

    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the most recently published view of the pool.
    pub fn snapshot(&self) -> Arc<PoolSnapshot> {
        Arc::clone(&self.published.read())
    }

    /// Endpoint of `slot`: `worker_host:(base_port + slot * port_stride)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessSpawn`] if the port does not fit in a `u16`.
    pub fn endpoint_for_slot(&self, slot: usize) -> Result<SocketAddr> {
        let port = u16::try_from(slot)
            .ok()
            .and_then(|slot| slot.checked_mul(self.config.port_stride))
            .and_then(|offset| offset.checked_add(self.config.base_port))
            .ok_or_else(|| Error::ProcessSpawn {
                slot,
                reason: "port out of range".to_string(),
            })?;
        Ok(SocketAddr::new(self.config.worker_host, port))
    }

    /// Grows or shrinks the pool to exactly `new_size` workers and sets the
    /// concurrency limit to `new_size`.
    ///
    /// - Growth starts every new slot in parallel and waits until each one
    ///   serves requests. If any slot fails, every process started by this
    ///   call is terminated and the pool is left as it was.
    /// - Shrink drops the records of every slot `>= new_size` and returns
    ///   without waiting for the processes to exit. Each one gets a graceful
    ///   termination in the background once no snapshot routes to it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPoolSize`] if `new_size` is outside `[1, 64]`.
    /// - [`Error::ProcessSpawn`] if a new worker could not be started.
    pub async fn resize(&self, new_size: usize) -> Result<()> {
        let new_size = validate_pool_size(i64::try_from(new_size).unwrap_or(i64::MAX))?;
        let mut registry = self.registry.lock().await;
        let current = registry.workers.len();

        if new_size > current {
            let started = self.start_slots(current, new_size).await?;
            registry.workers.extend(started);
        } else if new_size < current {
            for mut record in registry.workers.drain(new_size..) {
                tracing::info!(slot = record.slot(), endpoint = %record.endpoint(), "Worker draining");
                tokio::spawn(record.retire(self.config.shutdown_timeout));
            }
        }

        registry.concurrency_limit = new_size;
        self.publish(&registry);
        increment_pool_resizes();

        tracing::info!(from = current, to = new_size, "Worker pool resized");
        Ok(())
    }

    async fn start_slots(&self, from: usize, to: usize) -> Result<Vec<WorkerRecord>> {
        let config = &self.config;
        let attempts = join_all((from..to).map(|slot| async move {
            let endpoint = self.endpoint_for_slot(slot)?;
            WorkerRecord::start(slot, endpoint, config).await
        }))
        .await;

        let mut started = Vec::with_capacity(attempts.len());
        let mut first_error = None;
        for attempt in attempts {
            match attempt {
                Ok(record) => started.push(record),
                Err(e) => {
                    tracing::error!("{e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => Ok(started),
            Some(e) => {
                for mut record in started {
                    record.signal_terminate();
                    tokio::spawn(record.reap(config.shutdown_timeout));
                }
                Err(e)
            }
        }
    }

    /// Runs one supervision pass.
    ///
    /// Every `Running` worker whose process exited, or whose health endpoint
    /// does not answer `SERVING`, is killed and marked `Stopped`. With
    /// `respawn` enabled every `Stopped` slot, including those left by an
    /// earlier failed respawn, is restarted on the same endpoint; otherwise
    /// it stays `Stopped` and receives no rows. Returns the number of
    /// workers found dead.
    pub async fn supervise(&self) -> usize {
        let mut exited = Vec::new();
        let mut candidates = Vec::new();
        let mut restart = Vec::new();
        {
            let mut registry = self.registry.lock().await;
            for record in &mut registry.workers {
                match record.state() {
                    WorkerState::Running => {
                        let gone = record.has_exited();
                        let target = (record.slot(), record.pid());
                        if gone {
                            exited.push(target);
                        } else {
                            candidates.push((target, record.endpoint()));
                        }
                    }
                    WorkerState::Stopped if self.config.respawn => {
                        restart.push(record.slot());
                    }
                    _ => {}
                }
            }
        }

        let probes = join_all(
            candidates
                .iter()
                .map(|&(_, endpoint)| probe_health(endpoint, PROBE_TIMEOUT)),
        )
        .await;
        exited.extend(
            candidates
                .iter()
                .zip(probes)
                .filter(|(_, healthy)| !healthy)
                .map(|(&(target, _), _)| target),
        );

        let mut dead = 0;
        if !exited.is_empty() {
            let mut registry = self.registry.lock().await;
            for (slot, pid) in exited {
                // Skip slots resized away or replaced while probing.
                let Some(record) = registry.workers.get_mut(slot) else {
                    continue;
                };
                if record.state() != WorkerState::Running || record.pid() != pid {
                    continue;
                }
                tracing::warn!(slot, endpoint = %record.endpoint(), "Worker unresponsive");
                record.kill().await;
                dead += 1;
                if self.config.respawn {
                    restart.push(slot);
                }
            }
            if dead > 0 {
                self.publish(&registry);
            }
        }

        if !restart.is_empty() {
            self.restart_slots(restart).await;
        }
        dead
    }

    /// Starts fresh processes for `slots` without holding the registry lock,
    /// then swaps each one in if its slot is still `Stopped`.
    async fn restart_slots(&self, slots: Vec<usize>) {
        let config = &self.config;
        let attempts = join_all(slots.into_iter().map(|slot| async move {
            let endpoint = self.endpoint_for_slot(slot)?;
            WorkerRecord::start(slot, endpoint, config).await
        }))
        .await;

        let mut registry = self.registry.lock().await;
        let mut replaced = false;
        for attempt in attempts {
            let record = match attempt {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!("Respawn failed: {e}");
                    continue;
                }
            };
            match registry.workers.get_mut(record.slot()) {
                Some(existing) if existing.state() == WorkerState::Stopped => {
                    tracing::info!(slot = record.slot(), "Worker respawned");
                    *existing = record;
                    replaced = true;
                }
                _ => {
                    tracing::debug!(slot = record.slot(), "Slot changed during respawn");
                    tokio::spawn(record.retire(config.shutdown_timeout));
                }
            }
        }

        if replaced {
            self.publish(&registry);
        }
    }

    /// Calls [`PoolManager::supervise`] every `health_interval` until `token`
    /// is cancelled. Returns immediately when the interval is zero.
    pub async fn run_supervisor(self: Arc<Self>, token: CancellationToken) {
        if self.config.health_interval.is_zero() {
            tracing::debug!("Worker supervision disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; workers were just checked by
        // the resize that started them.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.supervise().await;
                }
            }
        }

        tracing::debug!("Worker supervisor stopped");
    }

    /// Terminates every worker and waits for all of them to exit, killing the
    /// ones still alive after `shutdown_timeout`.
    pub async fn shutdown(&self) {
        let mut registry = self.registry.lock().await;
        let records: Vec<_> = registry.workers.drain(..).collect();
        registry.concurrency_limit = 0;
        self.publish(&registry);
        drop(registry);

        tracing::info!("Stopping {} workers", records.len());
        let grace = self.config.shutdown_timeout;
        join_all(records.into_iter().map(|mut record| {
            record.signal_terminate();
            record.reap(grace)
        }))
        .await;

        tracing::info!("Worker pool shutdown complete");
    }

    fn publish(&self, registry: &Registry) {
        let leases = registry
            .workers
            .iter()
            .filter(|record| record.state() == WorkerState::Running)
            .filter_map(WorkerRecord::lease)
            .collect();
        let snapshot = PoolSnapshot::new(
            registry.workers.iter().map(WorkerRecord::info).collect(),
            registry.concurrency_limit,
        )
        .with_leases(leases);
        record_pool_size(snapshot.routable().len() as u64);
        *self.published.write() = Arc::new(snapshot);
    }
}
