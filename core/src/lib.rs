//! Core data model and shared utilities for the service discovery scanner.

pub mod error;
pub mod model;
pub mod names;
pub mod ratelimiter;

pub use error::ScanError;
pub use model::{
    Candidate, ConnectResult, DeviceInfo, ProbeOutcome, ProbeStatus, Protocol, ServiceRecord,
    SniffResult,
};
pub use names::{ServiceNames, UNKNOWN_SERVICE};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
