//! The worker side of the protocol: a tonic server exposing `Worker.MulRow`
//! plus the standard gRPC health service.

mod serve;
mod service;

pub use serve::*;
pub use service::*;
