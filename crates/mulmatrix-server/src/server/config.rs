use anyhow::{Context, bail};
use clap::{ArgAction, Parser};
use core::time::Duration;
use mulmatrix_core::types::{DEFAULT_BASE_PORT, MAX_POOL_SIZE, validate_pool_size};
use std::{net::IpAddr, path::PathBuf};

/// Name of the worker executable, looked up next to the master binary unless
/// `WORKER_EXE` says otherwise.
pub const WORKER_EXE_NAME: &str = "mulmatrix-worker";

/// Default cap on encoded/decoded gRPC messages. A single `MulRow` request
/// carries the whole right-hand matrix, so tonic's 4 MiB default is too small.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;

/// Runtime configuration for the `mulmatrix-master` binary.
///
/// Every value can come from a CLI flag or an environment variable (a `.env`
/// file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mulmatrix-master",
    version,
    about = "HTTP front end distributing matrix products across worker processes"
)]
pub struct CliArgs {
    /// Address the HTTP API listens on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:9090"))]
    pub server_addr: String,

    /// Number of worker processes started at boot. Also the initial
    /// concurrency limit of every multiplication.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 8)]
    pub num_workers: usize,

    /// Path of the worker executable. Defaults to `mulmatrix-worker` in the
    /// same directory as this binary.
    ///
    /// Environment variable: `WORKER_EXE`
    #[arg(long, env = "WORKER_EXE")]
    pub worker_exe: Option<PathBuf>,

    /// Host the workers bind to and the master connects to.
    ///
    /// Environment variable: `WORKER_HOST`
    #[arg(long, env = "WORKER_HOST", default_value = "127.0.0.1")]
    pub worker_host: IpAddr,

    /// Port of slot 0.
    ///
    /// Environment variable: `BASE_PORT`
    #[arg(long, env = "BASE_PORT", default_value_t = DEFAULT_BASE_PORT)]
    pub base_port: u16,

    /// Distance between the ports of two consecutive slots.
    ///
    /// Environment variable: `PORT_STRIDE`
    #[arg(long, env = "PORT_STRIDE", default_value_t = 1)]
    pub port_stride: u16,

    /// How long a freshly spawned worker may take to accept connections.
    ///
    /// Environment variable: `STARTUP_TIMEOUT_MS`
    #[arg(long, env = "STARTUP_TIMEOUT_MS", default_value_t = 10_000)]
    pub startup_timeout_ms: u64,

    /// Deadline applied to every `MulRow` call.
    ///
    /// Environment variable: `CALL_TIMEOUT_MS`
    #[arg(long, env = "CALL_TIMEOUT_MS", default_value_t = 30_000)]
    pub call_timeout_ms: u64,

    /// Period of the worker liveness check. `0` disables supervision.
    ///
    /// Environment variable: `HEALTH_INTERVAL_MS`
    #[arg(long, env = "HEALTH_INTERVAL_MS", default_value_t = 2_000)]
    pub health_interval_ms: u64,

    /// Restart crashed workers on their slot. When disabled, a crashed worker
    /// stays in the registry as `Stopped` and receives no rows.
    ///
    /// Environment variable: `RESPAWN_WORKERS`
    #[arg(long, env = "RESPAWN_WORKERS", default_value_t = true, action = ArgAction::Set)]
    pub respawn: bool,

    /// Seconds to wait for in-flight work and exiting workers on shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Maximum size of a gRPC message exchanged with workers.
    ///
    /// Environment variable: `MAX_MESSAGE_BYTES`
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,
}

/// How the pool manager starts, probes and stops worker processes.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub worker_exe: PathBuf,
    pub worker_host: IpAddr,
    pub base_port: u16,
    pub port_stride: u16,
    pub startup_timeout: Duration,
    pub health_interval: Duration,
    pub respawn: bool,
    pub shutdown_timeout: Duration,
    pub max_message_bytes: usize,
}

/// How the dispatch engine talks to workers.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub call_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_message_bytes: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub num_workers: usize,
    pub pool: PoolConfig,
    pub dispatch: DispatchConfig,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let num_workers = validate_pool_size(args.num_workers as i64)
            .with_context(|| format!("NUM_WORKERS ({}) is out of range", args.num_workers))?;

        if args.port_stride == 0 {
            bail!("PORT_STRIDE must be greater than 0");
        }

        let highest_port = u32::from(args.base_port)
            + u32::from(args.port_stride) * (MAX_POOL_SIZE as u32 - 1);
        if highest_port > u32::from(u16::MAX) {
            bail!(
                "BASE_PORT ({}) + PORT_STRIDE ({}) leaves no room for {} workers",
                args.base_port,
                args.port_stride,
                MAX_POOL_SIZE
            );
        }

        if args.call_timeout_ms == 0 {
            bail!("CALL_TIMEOUT_MS must be greater than 0");
        }

        if args.startup_timeout_ms == 0 {
            bail!("STARTUP_TIMEOUT_MS must be greater than 0");
        }

        let worker_exe = match args.worker_exe {
            Some(path) => path,
            None => std::env::current_exe()
                .context("failed to locate the master executable")?
                .with_file_name(WORKER_EXE_NAME),
        };

        let shutdown_timeout = Duration::from_secs(args.shutdown_timeout);

        Ok(Self {
            server_addr: args.server_addr,
            num_workers,
            pool: PoolConfig {
                worker_exe,
                worker_host: args.worker_host,
                base_port: args.base_port,
                port_stride: args.port_stride,
                startup_timeout: Duration::from_millis(args.startup_timeout_ms),
                health_interval: Duration::from_millis(args.health_interval_ms),
                respawn: args.respawn,
                shutdown_timeout,
                max_message_bytes: args.max_message_bytes,
            },
            dispatch: DispatchConfig {
                call_timeout: Duration::from_millis(args.call_timeout_ms),
                max_message_bytes: args.max_message_bytes,
                ..DispatchConfig::default()
            },
            shutdown_timeout,
        })
    }
}

/// Runtime configuration for the `mulmatrix-worker` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "mulmatrix-worker",
    version,
    about = "Serves the Worker.MulRow procedure on one TCP port"
)]
pub struct WorkerArgs {
    /// TCP port to bind.
    pub port: u16,

    /// Interface to bind.
    ///
    /// Environment variable: `WORKER_BIND_HOST`
    #[arg(long, env = "WORKER_BIND_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Maximum size of a gRPC message exchanged with the master.
    ///
    /// Environment variable: `MAX_MESSAGE_BYTES`
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,
}
