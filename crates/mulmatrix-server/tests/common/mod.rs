use core::time::Duration;
use mulmatrix_server::server::config::{DEFAULT_MAX_MESSAGE_BYTES, PoolConfig};
use std::path::PathBuf;

/// Pool configuration launching the real worker binary on `base_port..`.
///
/// Each test uses its own port range so tests can run in parallel.
pub fn pool_config(base_port: u16) -> PoolConfig {
    PoolConfig {
        worker_exe: PathBuf::from(env!("CARGO_BIN_EXE_mulmatrix-worker")),
        worker_host: [127, 0, 0, 1].into(),
        base_port,
        port_stride: 1,
        startup_timeout: Duration::from_secs(10),
        health_interval: Duration::ZERO,
        respawn: true,
        shutdown_timeout: Duration::from_secs(2),
        max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
    }
}
