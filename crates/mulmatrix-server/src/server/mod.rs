pub mod config;
pub mod dispatch;
pub mod http;
pub mod pool;
pub mod service;
pub mod signal;
pub mod telemetry;
pub mod worker;
