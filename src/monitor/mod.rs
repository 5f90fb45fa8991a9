//! Request performance monitoring.
//!
//! The `MonitorListener` drives one `MonitorSample` per request through the
//! lifecycle (start, dispatch, render, complete) and hands finished samples
//! to a `Monitor`. The in-process implementation is `HealthMonitor`, which
//! keeps the registry of active requests and per-command totals.

mod context;
pub mod cpu;
mod health;
mod listener;
mod sample;

use std::time::Duration;

pub use context::{RequestContext, RequestScope};
pub use health::{ActiveRequest, CommandStats, HealthMonitor, HealthReport, SampleSummary};
pub use listener::{MonitorListener, ScopedMonitorListener};
pub use sample::{MonitorSample, SamplePhase};

/// Errors raised while processing a finished sample.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Monitor state lock poisoned")]
    Poisoned,

    #[error("Failed to process sample: {0}")]
    Processing(String),
}

/// Consumer of request samples and lifecycle notifications.
///
/// Implementations are shared across every request, so all methods take
/// `&self`. The notification hooks default to doing nothing.
pub trait Monitor: Send + Sync {
    /// Checked at every sampler entry point; stale reads are acceptable.
    fn is_enabled(&self) -> bool;

    fn current_thread_cpu_time(&self) -> Option<Duration>;

    /// Register a request as in flight.
    fn add_request(&self, sample: &MonitorSample);

    fn remove_request(&self, sample: &MonitorSample);

    /// Aggregate a finished sample.
    fn process(&self, sample: &MonitorSample, request: &RequestContext)
        -> Result<(), MonitorError>;

    fn dispatch_starting(&self, _sample: &MonitorSample, _command: &str) {}

    fn dispatch_complete(&self) {}

    fn render_starting(&self) {}

    fn render_complete(&self) {}

    fn query_starting(&self) {}

    fn query_completing(&self) {}
}
