//! Worker process pool.
//!
//! - [`manager`] - [`PoolManager`](manager::PoolManager): registry, resize,
//!   supervision, shutdown.
//! - [`worker`] - per-process lifecycle and health probing.
//! - [`snapshot`] - immutable views handed to the dispatch engine.

pub mod manager;
pub mod snapshot;
pub mod worker;

pub use manager::PoolManager;
pub use snapshot::{PoolSnapshot, WorkerInfo};
pub use worker::WorkerState;
