//! Hermes daemon library
//!
//! Pieces of the `hermesd` binary:
//! - Configuration loading
//! - Storage backend wiring
//! - Server lifecycle: probe engine, metric sink, `/metrics` endpoint

pub mod backends;
pub mod config;
pub mod error;
pub mod server;

pub use config::DaemonConfig;
pub use error::{DaemonError, DaemonResult};
pub use server::Server;
