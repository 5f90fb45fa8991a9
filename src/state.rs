//! Shared application state for request handlers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::ConnectorFactory;
use crate::monitor::{HealthMonitor, MonitorListener};

/// Shared application state, cloneable across handlers via Arc-wrapped fields.
///
/// Contains the application configuration, the database connector factory,
/// the health monitor, and the lifecycle listener that feeds it.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub monitor: Arc<HealthMonitor>,
    pub listener: Arc<MonitorListener>,
    request_counter: Arc<AtomicU64>,
}

impl AppState {
    /// Creates a new application state and binds a listener to the monitor.
    pub fn new(
        config: AppConfig,
        connectors: Arc<dyn ConnectorFactory>,
        monitor: Arc<HealthMonitor>,
    ) -> Self {
        let listener = Arc::new(MonitorListener::new(monitor.clone()));
        Self {
            config: Arc::new(config),
            connectors,
            monitor,
            listener,
            request_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Sequence number for the next inbound request, starting at 1.
    pub fn next_request_number(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}
