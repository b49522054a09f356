use super::worker::{WorkerLease, WorkerState};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};

/// Read-only view of one worker slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub slot: usize,
    pub endpoint: SocketAddr,
    pub state: WorkerState,
    pub pid: Option<u32>,
}

/// Immutable picture of the pool taken at one point in time.
///
/// The dispatch engine routes every row of a multiplication through the same
/// snapshot, so a resize that lands mid-call never changes where the remaining
/// rows of that call go. It also holds a lease on each routable worker the
/// pool manages, so a worker removed by a shrink keeps serving until every
/// snapshot that can reach it is dropped. Only `Running` workers are routable.
#[derive(Clone, Debug, Default, Serialize)]
pub struct PoolSnapshot {
    workers: Vec<WorkerInfo>,
    concurrency_limit: usize,
    #[serde(skip)]
    routable: Vec<SocketAddr>,
    #[serde(skip)]
    leases: Vec<Arc<WorkerLease>>,
}

impl PoolSnapshot {
    pub fn new(workers: Vec<WorkerInfo>, concurrency_limit: usize) -> Self {
        let routable = workers
            .iter()
            .filter(|w| w.state == WorkerState::Running)
            .map(|w| w.endpoint)
            .collect();
        Self {
            workers,
            concurrency_limit,
            routable,
            leases: Vec::new(),
        }
    }

    pub(crate) fn with_leases(mut self, leases: Vec<Arc<WorkerLease>>) -> Self {
        self.leases = leases;
        self
    }

    /// Builds a snapshot of already-running workers that this process does
    /// not manage, e.g. workers started by an external supervisor.
    pub fn from_endpoints(
        endpoints: impl IntoIterator<Item = SocketAddr>,
        concurrency_limit: usize,
    ) -> Self {
        let workers = endpoints
            .into_iter()
            .enumerate()
            .map(|(slot, endpoint)| WorkerInfo {
                slot,
                endpoint,
                state: WorkerState::Running,
                pid: None,
            })
            .collect();
        Self::new(workers, concurrency_limit)
    }

    pub fn workers(&self) -> &[WorkerInfo] {
        &self.workers
    }

    /// Number of worker records, whatever their state.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub const fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn routable(&self) -> &[SocketAddr] {
        &self.routable
    }

    /// Static round-robin: row `i` goes to `routable[i mod len]`.
    pub fn endpoint_for_row(&self, row: usize) -> Option<SocketAddr> {
        if self.routable.is_empty() {
            None
        } else {
            Some(self.routable[row % self.routable.len()])
        }
    }
}
