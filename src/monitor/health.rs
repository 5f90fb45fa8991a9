//! In-process health monitor.
//!
//! Tracks requests currently in flight, aggregates finished samples into
//! per-command totals, and keeps a bounded list of recent samples for the
//! `/monitor` report.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::MonitorConfig;

use super::context::RequestContext;
use super::cpu;
use super::sample::{MonitorSample, SamplePhase};
use super::{Monitor, MonitorError};

/// A request registered as in flight.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRequest {
    pub id: Uuid,
    pub request_number: Option<u64>,
    pub command: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Running totals for one dispatch command.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CommandStats {
    pub count: u64,
    pub total_logic_ms: f64,
    pub max_logic_ms: f64,
    pub total_cpu_ms: f64,
    pub queries: u64,
    pub query_exceptions: u64,
}

/// A finished sample as shown in the report.
#[derive(Debug, Clone, Serialize)]
pub struct SampleSummary {
    pub id: Uuid,
    pub request_id: Uuid,
    pub request_number: Option<u64>,
    pub method: String,
    pub path: String,
    pub command: Option<String>,
    /// Every command dispatched while this sample was attached
    pub dispatched: Vec<String>,
    #[serde(serialize_with = "serialize_phase")]
    pub phase: SamplePhase,
    pub started_at: DateTime<Utc>,
    pub total_ms: f64,
    pub logic_ms: Option<f64>,
    pub render_ms: Option<f64>,
    pub cpu_ms: Option<f64>,
    pub dispatches: usize,
    pub renders: usize,
    pub queries: u32,
    pub query_ms: f64,
    pub query_exceptions: u32,
}

impl SampleSummary {
    fn new(sample: &MonitorSample, request: &RequestContext) -> Self {
        Self {
            id: sample.id(),
            request_id: request.request_id(),
            request_number: sample.request_number(),
            method: request.method().to_string(),
            path: request.path().to_string(),
            command: sample.command().map(str::to_string),
            dispatched: sample.dispatches().map(str::to_string).collect(),
            phase: sample.phase(),
            started_at: sample.started_at(),
            total_ms: millis(sample.total_time()),
            logic_ms: sample.logic_time().map(millis),
            render_ms: sample.render_time().map(millis),
            cpu_ms: sample.cpu_time().map(millis),
            dispatches: sample.dispatch_count(),
            renders: sample.render_count(),
            queries: sample.query_count(),
            query_ms: millis(sample.query_time()),
            query_exceptions: sample.query_exceptions(),
        }
    }
}

/// Snapshot of the monitor for the `/monitor` endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub enabled: bool,
    pub processed: u64,
    pub query_exceptions: u64,
    pub queries_in_flight: i64,
    pub dispatches_in_flight: i64,
    pub renders: u64,
    pub active: Vec<ActiveRequest>,
    pub commands: BTreeMap<String, CommandStats>,
    pub recent: Vec<SampleSummary>,
}

/// Command bucket for samples that never saw a dispatch.
const UNDISPATCHED: &str = "(none)";

#[derive(Default)]
struct Aggregates {
    processed: u64,
    query_exceptions: u64,
    commands: HashMap<String, CommandStats>,
    recent: VecDeque<SampleSummary>,
}

pub struct HealthMonitor {
    enabled: bool,
    recent_capacity: usize,
    active: RwLock<HashMap<Uuid, ActiveRequest>>,
    aggregates: Mutex<Aggregates>,
    queries_in_flight: AtomicI64,
    dispatches_in_flight: AtomicI64,
    renders: AtomicU64,
}

impl HealthMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            enabled: config.enabled,
            recent_capacity: config.recent_samples,
            active: RwLock::new(HashMap::new()),
            aggregates: Mutex::new(Aggregates::default()),
            queries_in_flight: AtomicI64::new(0),
            dispatches_in_flight: AtomicI64::new(0),
            renders: AtomicU64::new(0),
        }
    }

    pub fn active_requests(&self) -> Vec<ActiveRequest> {
        match self.active.read() {
            Ok(active) => {
                let mut requests: Vec<ActiveRequest> = active.values().cloned().collect();
                requests.sort_by_key(|r| r.started_at);
                requests
            }
            Err(_) => {
                tracing::warn!("poisoned active request registry");
                Vec::new()
            }
        }
    }

    pub fn report(&self) -> HealthReport {
        let (processed, query_exceptions, commands, recent): (
            u64,
            u64,
            BTreeMap<String, CommandStats>,
            Vec<SampleSummary>,
        ) = match self.aggregates.lock() {
            Ok(aggregates) => (
                aggregates.processed,
                aggregates.query_exceptions,
                aggregates
                    .commands
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                aggregates.recent.iter().cloned().collect(),
            ),
            Err(_) => {
                tracing::warn!("poisoned monitor aggregates");
                (0, 0, BTreeMap::new(), Vec::new())
            }
        };

        HealthReport {
            enabled: self.is_enabled(),
            processed,
            query_exceptions,
            queries_in_flight: self.queries_in_flight.load(Ordering::Relaxed),
            dispatches_in_flight: self.dispatches_in_flight.load(Ordering::Relaxed),
            renders: self.renders.load(Ordering::Relaxed),
            active: self.active_requests(),
            commands,
            recent,
        }
    }
}

impl Monitor for HealthMonitor {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn current_thread_cpu_time(&self) -> Option<Duration> {
        cpu::current_thread_cpu_time()
    }

    fn add_request(&self, sample: &MonitorSample) {
        let request = ActiveRequest {
            id: sample.id(),
            request_number: sample.request_number(),
            command: sample.command().map(str::to_string),
            started_at: sample.started_at(),
        };
        match self.active.write() {
            Ok(mut active) => {
                active.insert(request.id, request);
            }
            Err(_) => tracing::warn!("poisoned active request registry"),
        }
    }

    fn remove_request(&self, sample: &MonitorSample) {
        match self.active.write() {
            Ok(mut active) => {
                active.remove(&sample.id());
            }
            Err(_) => tracing::warn!("poisoned active request registry"),
        }
    }

    fn process(
        &self,
        sample: &MonitorSample,
        request: &RequestContext,
    ) -> Result<(), MonitorError> {
        let summary = SampleSummary::new(sample, request);
        let mut aggregates = self.aggregates.lock().map_err(|_| MonitorError::Poisoned)?;

        aggregates.processed += 1;
        aggregates.query_exceptions += u64::from(sample.query_exceptions());

        let command = sample.command().unwrap_or(UNDISPATCHED).to_string();
        let stats = aggregates.commands.entry(command).or_default();
        let logic_ms = summary.logic_ms.unwrap_or(summary.total_ms);
        stats.count += 1;
        stats.total_logic_ms += logic_ms;
        stats.max_logic_ms = stats.max_logic_ms.max(logic_ms);
        stats.total_cpu_ms += summary.cpu_ms.unwrap_or_default();
        stats.queries += u64::from(summary.queries);
        stats.query_exceptions += u64::from(summary.query_exceptions);

        tracing::debug!(
            sample_id = %summary.id,
            command = summary.command.as_deref().unwrap_or(UNDISPATCHED),
            total_ms = summary.total_ms,
            cpu_ms = ?summary.cpu_ms,
            queries = summary.queries,
            "Processed monitor sample"
        );

        if self.recent_capacity > 0 {
            if aggregates.recent.len() == self.recent_capacity {
                aggregates.recent.pop_front();
            }
            aggregates.recent.push_back(summary);
        }

        Ok(())
    }

    fn dispatch_starting(&self, _sample: &MonitorSample, _command: &str) {
        self.dispatches_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn dispatch_complete(&self) {
        self.dispatches_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    fn render_complete(&self) {
        self.renders.fetch_add(1, Ordering::Relaxed);
    }

    fn query_starting(&self) {
        self.queries_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn query_completing(&self) {
        self.queries_in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

fn serialize_phase<S: serde::Serializer>(phase: &SamplePhase, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(phase)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
