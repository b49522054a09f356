//! Lifecycle of a single worker process.
//!
//! A [`WorkerRecord`] owns the child process bound to one pool slot and walks
//! it through `Starting -> Running -> Draining -> Stopped`. Its stdout and
//! stderr are piped into the master's log, one event per line, tagged with the
//! slot so interleaved output from many workers stays readable.

use super::snapshot::WorkerInfo;
use crate::server::config::PoolConfig;
use core::time::Duration;
use mulmatrix_core::{Error, Result, types::WORKER_SERVICE_NAME};
use serde::Serialize;
use std::{net::SocketAddr, process::Stdio, sync::Arc};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::oneshot,
    time::{Instant, sleep, timeout},
};
use tonic::transport::Endpoint;
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on a single health probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Process spawned, endpoint not reachable yet.
    Starting,
    /// Endpoint serving; eligible for rows.
    Running,
    /// Termination requested; no longer routable.
    Draining,
    /// Process exited. Terminal unless the supervisor respawns the slot.
    Stopped,
}

/// Held by every snapshot that can route rows to a worker.
///
/// A retired worker keeps serving until the last lease is dropped.
#[derive(Debug)]
pub struct WorkerLease {
    _released: oneshot::Sender<()>,
}

pub struct WorkerRecord {
    slot: usize,
    endpoint: SocketAddr,
    child: Child,
    state: WorkerState,
    lease: Option<Arc<WorkerLease>>,
    released: Option<oneshot::Receiver<()>>,
}

impl WorkerRecord {
    /// Spawns the worker for `slot` and waits until it serves requests.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProcessSpawn`] if the executable cannot be started,
    /// exits early, or does not become healthy within
    /// `config.startup_timeout`. The process is killed in every error case.
    pub async fn start(slot: usize, endpoint: SocketAddr, config: &PoolConfig) -> Result<Self> {
        let child = spawn_process(slot, endpoint, config)?;
        let (tx, rx) = oneshot::channel();
        let mut record = Self {
            slot,
            endpoint,
            child,
            state: WorkerState::Starting,
            lease: Some(Arc::new(WorkerLease { _released: tx })),
            released: Some(rx),
        };
        if let Err(e) = record.wait_ready(config.startup_timeout).await {
            record.kill().await;
            return Err(e);
        }
        Ok(record)
    }

    pub const fn slot(&self) -> usize {
        self.slot
    }

    pub const fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    pub const fn state(&self) -> WorkerState {
        self.state
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// A new lease on this worker, or `None` once it was retired.
    pub fn lease(&self) -> Option<Arc<WorkerLease>> {
        self.lease.clone()
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            slot: self.slot,
            endpoint: self.endpoint,
            state: self.state,
            pid: self.child.id(),
        }
    }

    /// Returns `true` once the process has exited. Reaps it as a side effect.
    pub fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::warn!(slot = self.slot, status = %status, "Worker process exited");
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(slot = self.slot, "Failed to poll worker process: {e}");
                true
            }
        }
    }

    /// Sends a graceful termination request and marks the record `Draining`.
    ///
    /// On Unix this delivers `SIGTERM`; elsewhere the process is killed.
    pub fn signal_terminate(&mut self) {
        self.state = WorkerState::Draining;

        if self.send_sigterm() {
            return;
        }

        if let Err(e) = self.child.start_kill() {
            tracing::debug!(slot = self.slot, "Kill on exited worker ignored: {e}");
        }
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        let Some(pid) = self.child.id() else {
            return false;
        };
        // SAFETY: `pid` belongs to a child we own and have not reaped, so it
        // cannot have been recycled for an unrelated process.
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) -> bool {
        false
    }

    /// Takes a worker out of the pool without cutting off callers still
    /// routing to it.
    ///
    /// Waits until every outstanding [`WorkerLease`] is dropped, then sends a
    /// graceful termination and reaps the process.
    pub async fn retire(mut self, grace: Duration) {
        self.state = WorkerState::Draining;
        drop(self.lease.take());
        if let Some(released) = self.released.take() {
            // Resolves with an error once the last lease is gone.
            let _ = released.await;
        }
        tracing::debug!(slot = self.slot, endpoint = %self.endpoint, "Worker released by all callers");
        self.signal_terminate();
        self.reap(grace).await;
    }

    /// Waits for the process to exit, escalating to a hard kill after
    /// `grace`.
    pub async fn reap(mut self, grace: Duration) {
        let status = match timeout(grace, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::warn!(
                    slot = self.slot,
                    "Worker did not exit within {}ms, killing",
                    grace.as_millis()
                );
                let _ = self.child.start_kill();
                self.child.wait().await
            }
        };
        self.state = WorkerState::Stopped;

        match status {
            Ok(status) => {
                tracing::info!(slot = self.slot, endpoint = %self.endpoint, status = %status, "Worker stopped");
            }
            Err(e) => {
                tracing::error!(slot = self.slot, "Failed to reap worker: {e}");
            }
        }
    }

    /// Kills the process immediately and marks the record `Stopped`.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(slot = self.slot, "Kill failed: {e}");
        }
        self.state = WorkerState::Stopped;
    }

    async fn wait_ready(&mut self, startup_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + startup_timeout;

        loop {
            if let Some(status) = self.child.try_wait().map_err(|e| Error::ProcessSpawn {
                slot: self.slot,
                reason: format!("failed to poll process: {e}"),
            })? {
                return Err(Error::ProcessSpawn {
                    slot: self.slot,
                    reason: format!("exited with {status} before serving"),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if probe_health(self.endpoint, remaining.min(PROBE_TIMEOUT)).await {
                self.state = WorkerState::Running;
                tracing::info!(slot = self.slot, endpoint = %self.endpoint, pid = ?self.child.id(), "Worker running");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(Error::ProcessSpawn {
                    slot: self.slot,
                    reason: format!(
                        "{} not serving after {}ms",
                        self.endpoint,
                        startup_timeout.as_millis()
                    ),
                });
            }

            sleep(READY_POLL_INTERVAL).await;
        }
    }
}

fn spawn_process(slot: usize, endpoint: SocketAddr, config: &PoolConfig) -> Result<Child> {
    let mut child = Command::new(&config.worker_exe)
        .arg(endpoint.port().to_string())
        .env("WORKER_BIND_HOST", endpoint.ip().to_string())
        .env("MAX_MESSAGE_BYTES", config.max_message_bytes.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::ProcessSpawn {
            slot,
            reason: format!("{}: {e}", config.worker_exe.display()),
        })?;

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(slot, "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(slot, "stderr", stderr));
    }

    tracing::debug!(slot, %endpoint, pid = ?child.id(), "Worker process spawned");
    Ok(child)
}

async fn forward_output<R>(slot: usize, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(target: "mulmatrix::worker", slot, stream, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(slot, stream, "Worker output closed: {e}");
                break;
            }
        }
    }
}

/// Asks the worker at `endpoint` whether the row multiplier is serving.
///
/// Any transport failure, timeout or non-`SERVING` answer counts as
/// unhealthy.
pub async fn probe_health(endpoint: SocketAddr, probe_timeout: Duration) -> bool {
    let Ok(channel_endpoint) = Endpoint::from_shared(format!("http://{endpoint}")) else {
        return false;
    };

    let probe = async {
        let channel = channel_endpoint.connect().await.ok()?;
        let response = HealthClient::new(channel)
            .check(HealthCheckRequest {
                service: WORKER_SERVICE_NAME.to_string(),
            })
            .await
            .ok()?;
        Some(response.into_inner().status == ServingStatus::Serving as i32)
    };

    matches!(timeout(probe_timeout, probe).await, Ok(Some(true)))
}
