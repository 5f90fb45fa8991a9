//! Sentinel - startup database checks and request performance sampling
//!
//! Verifies database connectivity before the HTTP listener is bound, then
//! samples every routed request (wall-clock checkpoints, thread CPU time,
//! query counts) into an in-process health monitor.

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod monitor;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use error::*;
