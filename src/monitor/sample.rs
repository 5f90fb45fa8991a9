//! Per-request performance samples.

use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Where a sample is in the request lifecycle.
///
/// An empty request slot is the idle state; a sample exists only from
/// `Started` onward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SamplePhase {
    Started,
    Dispatching,
    LogicComplete,
    Rendering,
    Completed,
}

impl std::fmt::Display for SamplePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SamplePhase::Started => "started",
            SamplePhase::Dispatching => "dispatching",
            SamplePhase::LogicComplete => "logic-complete",
            SamplePhase::Rendering => "rendering",
            SamplePhase::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Timings and counters for one request.
///
/// Owned by the request's context slot for its whole life; nothing else
/// holds a mutable reference to it.
#[derive(Debug, Clone)]
pub struct MonitorSample {
    id: Uuid,
    request_number: Option<u64>,
    started_at: DateTime<Utc>,
    request_start: Instant,
    phase: SamplePhase,
    first_dispatch: bool,
    command: Option<String>,
    dispatch_starts: Vec<(String, Instant)>,
    logic_complete: Option<Instant>,
    render_starts: Vec<Instant>,
    render_completes: Vec<Instant>,
    request_complete: Option<Instant>,
    cpu_time_at_start: Option<Duration>,
    cpu_time_at_end: Option<Duration>,
    /// Thread whose counter `cpu_time_at_start` was read from
    cpu_thread: Option<ThreadId>,
    query_start: Option<Instant>,
    query_count: u32,
    query_time: Duration,
    query_exceptions: u32,
}

impl Default for MonitorSample {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitorSample {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            request_number: None,
            started_at: Utc::now(),
            request_start: Instant::now(),
            phase: SamplePhase::Started,
            first_dispatch: true,
            command: None,
            dispatch_starts: Vec::new(),
            logic_complete: None,
            render_starts: Vec::new(),
            render_completes: Vec::new(),
            request_complete: None,
            cpu_time_at_start: None,
            cpu_time_at_end: None,
            cpu_thread: None,
            query_start: None,
            query_count: 0,
            query_time: Duration::ZERO,
            query_exceptions: 0,
        }
    }

    // =========================================================================
    // Lifecycle transitions
    // =========================================================================

    /// Record the start of a dispatch to `command`.
    ///
    /// Returns true only for the first dispatch of this sample.
    pub fn dispatch_starting(&mut self, command: &str) -> bool {
        let first = self.first_dispatch;
        self.first_dispatch = false;
        self.command = Some(command.to_string());
        self.dispatch_starts.push((command.to_string(), Instant::now()));
        self.phase = SamplePhase::Dispatching;
        first
    }

    /// Mark the handler's logic as finished. Later calls are ignored.
    pub fn logic_complete(&mut self) {
        if self.logic_complete.is_none() {
            self.logic_complete = Some(Instant::now());
            if self.phase < SamplePhase::LogicComplete {
                self.phase = SamplePhase::LogicComplete;
            }
        }
    }

    pub fn render_starting(&mut self) {
        self.logic_complete();
        self.render_starts.push(Instant::now());
        self.phase = SamplePhase::Rendering;
    }

    pub fn render_complete(&mut self) {
        self.render_completes.push(Instant::now());
    }

    /// Mark the request as finished. Later calls are ignored.
    pub fn complete(&mut self) {
        if self.request_complete.is_none() {
            self.request_complete = Some(Instant::now());
            self.phase = SamplePhase::Completed;
        }
    }

    pub fn query_starting(&mut self) {
        self.query_start = Some(Instant::now());
        self.query_count += 1;
    }

    pub fn query_completing(&mut self) {
        if let Some(start) = self.query_start.take() {
            self.query_time += start.elapsed();
        }
    }

    pub fn query_exception(&mut self) {
        self.query_exceptions += 1;
    }

    pub fn set_request_number(&mut self, number: u64) {
        self.request_number = Some(number);
    }

    /// Record the current thread's CPU counter as the baseline.
    pub fn set_cpu_time_at_start(&mut self, cpu: Option<Duration>) {
        self.cpu_time_at_start = cpu;
        self.cpu_thread = cpu.map(|_| thread::current().id());
    }

    /// Record the current thread's CPU counter as the final reading.
    ///
    /// Per-thread counters are not comparable across threads, so a reading
    /// taken anywhere but the baseline's thread is discarded.
    pub fn set_cpu_time_at_end(&mut self, cpu: Option<Duration>) {
        self.cpu_time_at_end = match self.cpu_thread {
            Some(start_thread) if start_thread == thread::current().id() => cpu,
            _ => None,
        };
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_number(&self) -> Option<u64> {
        self.request_number
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn phase(&self) -> SamplePhase {
        self.phase
    }

    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Every dispatch recorded so far, in order.
    pub fn dispatches(&self) -> impl Iterator<Item = &str> {
        self.dispatch_starts.iter().map(|(command, _)| command.as_str())
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatch_starts.len()
    }

    pub fn render_count(&self) -> usize {
        self.render_starts.len()
    }

    pub fn render_complete_count(&self) -> usize {
        self.render_completes.len()
    }

    pub fn is_logic_complete(&self) -> bool {
        self.logic_complete.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.request_complete.is_some()
    }

    pub fn cpu_time_at_start(&self) -> Option<Duration> {
        self.cpu_time_at_start
    }

    pub fn cpu_time_at_end(&self) -> Option<Duration> {
        self.cpu_time_at_end
    }

    /// CPU used between start and end, when both were read on the same thread.
    pub fn cpu_time(&self) -> Option<Duration> {
        let start = self.cpu_time_at_start?;
        let end = self.cpu_time_at_end?;
        Some(end.saturating_sub(start))
    }

    /// Time from request start to the end of handler logic.
    pub fn logic_time(&self) -> Option<Duration> {
        self.logic_complete
            .map(|at| at.saturating_duration_since(self.request_start))
    }

    /// Time spent rendering, from the first render start to the last render
    /// completion.
    pub fn render_time(&self) -> Option<Duration> {
        let start = self.render_starts.first()?;
        let end = self.render_completes.last()?;
        Some(end.saturating_duration_since(*start))
    }

    /// Time from request start to completion, or to now while still active.
    pub fn total_time(&self) -> Duration {
        match self.request_complete {
            Some(at) => at.saturating_duration_since(self.request_start),
            None => self.request_start.elapsed(),
        }
    }

    pub fn query_count(&self) -> u32 {
        self.query_count
    }

    pub fn query_time(&self) -> Duration {
        self.query_time
    }

    pub fn query_exceptions(&self) -> u32 {
        self.query_exceptions
    }
}
