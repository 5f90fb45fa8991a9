//! Lifecycle listener that feeds request samples to the monitor.
//!
//! The host calls these hooks as a request moves through the framework:
//!
//! ```text
//! request_starting -> dispatch_starting -> [render_starting -> render_complete]
//!                  -> dispatch_complete -> request_completing
//! ```
//!
//! Stages may be skipped (API responses never render) or repeated (internal
//! redispatch), so the hooks are permissive: finalization is idempotent and
//! `request_completing` clears the slot again whatever happened before.
//! Every hook is a no-op while the monitor is disabled.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error};

use crate::db::{DatabaseConnectionListener, DbError, ListenerInstruction};

use super::context::{RequestContext, RequestScope};
use super::Monitor;

pub struct MonitorListener {
    monitor: Arc<dyn Monitor>,
}

impl MonitorListener {
    pub fn new(monitor: Arc<dyn Monitor>) -> Self {
        Self { monitor }
    }

    fn enabled(&self) -> bool {
        self.monitor.is_enabled()
    }

    // =========================================================================
    // Request hooks
    // =========================================================================

    pub fn request_starting(&self, ctx: &mut RequestContext) {
        if !self.enabled() {
            return;
        }
        let cpu = self.monitor.current_thread_cpu_time();
        ctx.sample().set_cpu_time_at_start(cpu);
    }

    /// Clear the slot even if `dispatch_complete` already detached the sample.
    pub fn request_completing(&self, ctx: &mut RequestContext) {
        if !self.enabled() {
            return;
        }
        ctx.clear_sample();
    }

    // =========================================================================
    // Dispatch hooks
    // =========================================================================

    pub fn dispatch_starting(&self, ctx: &mut RequestContext, command: &str) {
        if !self.enabled() {
            return;
        }
        let request_number = ctx.request_number();
        let sample = ctx.sample();
        if sample.dispatch_starting(command) {
            sample.set_request_number(request_number);
            self.monitor.add_request(sample);
            self.monitor.dispatch_starting(sample, command);
        }
    }

    /// An internal forward: finish the previous dispatch, then start `new_command`.
    pub fn redispatch_occurring(
        &self,
        ctx: &mut RequestContext,
        previous_command: &str,
        new_command: &str,
    ) {
        if !self.enabled() {
            return;
        }
        debug!(from = %previous_command, to = %new_command, "Redispatch");
        self.dispatch_complete(ctx);
        self.dispatch_starting(ctx, new_command);
    }

    /// Finalize the sample: hand it to the monitor, then deregister and detach
    /// it. Monitor failures are logged and never escape this call.
    pub fn dispatch_complete(&self, ctx: &mut RequestContext) {
        if !self.enabled() {
            return;
        }
        let cpu = self.monitor.current_thread_cpu_time();
        let mut sample = ctx.take_sample().unwrap_or_default();

        // Capture logic completion even when nothing was rendered
        sample.logic_complete();
        sample.complete();
        sample.set_cpu_time_at_end(cpu);

        let request: &RequestContext = ctx;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.monitor.process(&sample, request)
        }));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    sample_id = %sample.id(),
                    command = sample.command().unwrap_or_default(),
                    error = %e,
                    "Error while processing monitor sample"
                );
            }
            Err(_) => {
                error!(
                    sample_id = %sample.id(),
                    command = sample.command().unwrap_or_default(),
                    "Monitor panicked while processing sample"
                );
            }
        }

        self.monitor.remove_request(&sample);
        // Only a dispatched sample was announced through `dispatch_starting`
        if sample.dispatch_count() > 0 {
            self.monitor.dispatch_complete();
        }
    }

    // =========================================================================
    // Render hooks
    // =========================================================================

    pub fn render_starting(&self, ctx: &mut RequestContext, template: &str) {
        if !self.enabled() {
            return;
        }
        debug!(template = %template, "Render starting");
        ctx.sample().render_starting();
        self.monitor.render_starting();
    }

    pub fn render_complete(&self, ctx: &mut RequestContext) {
        if !self.enabled() {
            return;
        }
        ctx.sample().render_complete();
        self.monitor.render_complete();
    }

    // =========================================================================
    // Database hooks
    // =========================================================================

    pub fn query_starting(&self, ctx: &mut RequestContext) {
        if !self.enabled() {
            return;
        }
        ctx.sample().query_starting();
        self.monitor.query_starting();
    }

    pub fn query_completing(&self, ctx: &mut RequestContext) {
        if !self.enabled() {
            return;
        }
        ctx.sample().query_completing();
        self.monitor.query_completing();
    }

    /// Observational only: the caller's retry behaviour is never changed.
    pub fn exception_in_run_query(&self, ctx: &mut RequestContext) -> ListenerInstruction {
        self.query_exception(ctx)
    }

    pub fn exception_in_run_update_query(&self, ctx: &mut RequestContext) -> ListenerInstruction {
        self.query_exception(ctx)
    }

    pub fn exception_in_execute_batch(&self, ctx: &mut RequestContext) -> ListenerInstruction {
        self.query_exception(ctx)
    }

    fn query_exception(&self, ctx: &mut RequestContext) -> ListenerInstruction {
        if self.enabled() {
            ctx.sample().query_exception();
        }
        ListenerInstruction::DoNothing
    }
}

/// A `MonitorListener` bound to one request, attachable to database connectors.
pub struct ScopedMonitorListener {
    listener: Arc<MonitorListener>,
    scope: RequestScope,
}

impl ScopedMonitorListener {
    pub fn new(listener: Arc<MonitorListener>, scope: RequestScope) -> Self {
        Self { listener, scope }
    }
}

impl DatabaseConnectionListener for ScopedMonitorListener {
    fn query_starting(&self) {
        self.listener.query_starting(&mut self.scope.lock());
    }

    fn query_completing(&self) {
        self.listener.query_completing(&mut self.scope.lock());
    }

    fn exception_in_run_query(&self, error: &DbError) -> ListenerInstruction {
        debug!(error = %error, "Query failed");
        self.listener.exception_in_run_query(&mut self.scope.lock())
    }

    fn exception_in_run_update_query(&self, error: &DbError) -> ListenerInstruction {
        debug!(error = %error, "Update failed");
        self.listener
            .exception_in_run_update_query(&mut self.scope.lock())
    }

    fn exception_in_execute_batch(&self, error: &DbError) -> ListenerInstruction {
        debug!(error = %error, "Batch failed");
        self.listener.exception_in_execute_batch(&mut self.scope.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{MonitorError, MonitorSample};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Clone, Copy, Default, PartialEq)]
    enum Failure {
        #[default]
        None,
        Error,
        Panic,
    }

    #[derive(Default)]
    struct RecordingMonitor {
        disabled: AtomicBool,
        failure: Failure,
        active: Mutex<HashSet<Uuid>>,
        processed: Mutex<Vec<MonitorSample>>,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingMonitor {
        fn failing(failure: Failure) -> Self {
            Self {
                failure,
                ..Default::default()
            }
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn processed(&self) -> Vec<MonitorSample> {
            self.processed.lock().unwrap().clone()
        }

        fn active_count(&self) -> usize {
            self.active.lock().unwrap().len()
        }
    }

    impl Monitor for RecordingMonitor {
        fn is_enabled(&self) -> bool {
            !self.disabled.load(Ordering::Relaxed)
        }

        fn current_thread_cpu_time(&self) -> Option<Duration> {
            Some(Duration::from_millis(10))
        }

        fn add_request(&self, sample: &MonitorSample) {
            self.record(format!("add:{}", sample.command().unwrap_or_default()));
            self.active.lock().unwrap().insert(sample.id());
        }

        fn remove_request(&self, sample: &MonitorSample) {
            self.record("remove");
            self.active.lock().unwrap().remove(&sample.id());
        }

        fn process(
            &self,
            sample: &MonitorSample,
            _request: &RequestContext,
        ) -> Result<(), MonitorError> {
            self.record(format!("process:{}", sample.command().unwrap_or_default()));
            self.processed.lock().unwrap().push(sample.clone());
            match self.failure {
                Failure::None => Ok(()),
                Failure::Error => Err(MonitorError::Processing("boom".to_string())),
                Failure::Panic => panic!("monitor exploded"),
            }
        }

        fn dispatch_complete(&self) {
            self.record("dispatch_complete");
        }

        fn render_starting(&self) {
            self.record("render_starting");
        }

        fn query_starting(&self) {
            self.record("query_starting");
        }
    }

    fn setup(monitor: RecordingMonitor) -> (Arc<RecordingMonitor>, MonitorListener, RequestContext) {
        let monitor = Arc::new(monitor);
        let listener = MonitorListener::new(monitor.clone());
        let ctx = RequestContext::new(7, Uuid::new_v4(), "GET", "/x");
        (monitor, listener, ctx)
    }

    // =============================================================================
    // Basic lifecycle
    // =============================================================================

    #[test]
    fn test_start_dispatch_complete_processes_one_sample() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        assert_eq!(monitor.active_count(), 1);
        listener.dispatch_complete(&mut ctx);

        let processed = monitor.processed();
        assert_eq!(processed.len(), 1);
        let sample = &processed[0];
        assert!(sample.cpu_time_at_start().is_some());
        assert!(sample.cpu_time_at_end().is_some());
        assert!(sample.is_logic_complete());
        assert!(sample.logic_time().is_some());
        assert!(sample.is_complete());
        assert_eq!(sample.request_number(), Some(7));
        assert_eq!(sample.command(), Some("X"));

        assert_eq!(monitor.active_count(), 0);
        assert!(!ctx.has_sample());
    }

    #[test]
    fn test_second_dispatch_does_not_register_again() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.dispatch_starting(&mut ctx, "Y");

        let adds = monitor.calls().iter().filter(|c| c.starts_with("add:")).count();
        assert_eq!(adds, 1);
        assert_eq!(ctx.current_sample().unwrap().command(), Some("Y"));
    }

    #[test]
    fn test_render_stage_recorded_before_completion() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.render_starting(&mut ctx, "page.html");
        assert!(ctx.current_sample().unwrap().is_logic_complete());
        listener.render_complete(&mut ctx);
        listener.dispatch_complete(&mut ctx);
        listener.request_completing(&mut ctx);

        let processed = monitor.processed();
        assert_eq!(processed[0].render_count(), 1);
        assert_eq!(processed[0].render_complete_count(), 1);
        assert!(processed[0].render_time().is_some());
        assert!(monitor.calls().contains(&"render_starting".to_string()));
    }

    #[test]
    fn test_request_completing_clears_unfinished_sample() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.request_completing(&mut ctx);

        assert!(!ctx.has_sample());
        assert!(monitor.processed().is_empty());
    }

    #[test]
    fn test_request_completing_after_dispatch_complete_is_harmless() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.dispatch_complete(&mut ctx);
        listener.request_completing(&mut ctx);
        listener.request_completing(&mut ctx);

        assert!(!ctx.has_sample());
        assert_eq!(monitor.processed().len(), 1);
    }

    #[test]
    fn test_cpu_time_dropped_when_completed_on_another_thread() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        std::thread::scope(|s| {
            s.spawn(|| listener.dispatch_complete(&mut ctx));
        });

        let processed = monitor.processed();
        assert_eq!(processed.len(), 1);
        assert!(processed[0].cpu_time_at_start().is_some());
        assert_eq!(processed[0].cpu_time_at_end(), None);
        assert_eq!(processed[0].cpu_time(), None);
        assert_eq!(monitor.active_count(), 0);
    }

    #[test]
    fn test_undispatched_completion_is_not_announced() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        listener.request_starting(&mut ctx);
        listener.dispatch_complete(&mut ctx);

        assert_eq!(monitor.processed().len(), 1);
        assert_eq!(monitor.calls(), vec!["process:", "remove"]);
    }

    #[test]
    fn test_enabling_mid_request_does_not_announce_completion() {
        let recording = RecordingMonitor::default();
        recording.disabled.store(true, Ordering::Relaxed);
        let (monitor, listener, mut ctx) = setup(recording);

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        monitor.disabled.store(false, Ordering::Relaxed);
        listener.dispatch_complete(&mut ctx);

        assert!(!monitor.calls().contains(&"dispatch_complete".to_string()));
        assert_eq!(monitor.processed().len(), 1);
    }

    // =============================================================================
    // Redispatch
    // =============================================================================

    #[test]
    fn test_redispatch_matches_complete_then_start() {
        let (redispatched, listener, mut ctx) = setup(RecordingMonitor::default());
        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "A");
        listener.redispatch_occurring(&mut ctx, "A", "B");
        listener.dispatch_complete(&mut ctx);

        let (manual, listener, mut ctx) = setup(RecordingMonitor::default());
        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "A");
        listener.dispatch_complete(&mut ctx);
        listener.dispatch_starting(&mut ctx, "B");
        listener.dispatch_complete(&mut ctx);

        assert_eq!(redispatched.calls(), manual.calls());
        assert_eq!(
            redispatched.calls(),
            vec![
                "add:A",
                "process:A",
                "remove",
                "dispatch_complete",
                "add:B",
                "process:B",
                "remove",
                "dispatch_complete",
            ]
        );

        let processed = redispatched.processed();
        assert_eq!(processed.len(), 2);
        assert_eq!(processed[0].command(), Some("A"));
        assert_eq!(processed[1].command(), Some("B"));
        // The forwarded segment starts a fresh sample without a CPU baseline
        assert!(processed[0].cpu_time().is_some());
        assert_eq!(processed[1].cpu_time(), None);
        assert_eq!(processed[1].request_number(), Some(7));
        assert_eq!(redispatched.active_count(), 0);
    }

    // =============================================================================
    // Monitor failures
    // =============================================================================

    #[test]
    fn test_process_error_still_cleans_up() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::failing(Failure::Error));

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.dispatch_complete(&mut ctx);

        assert_eq!(monitor.active_count(), 0);
        assert!(!ctx.has_sample());
        assert!(monitor.calls().contains(&"remove".to_string()));
    }

    #[test]
    fn test_process_panic_still_cleans_up() {
        let (monitor, listener, mut ctx) = setup(RecordingMonitor::failing(Failure::Panic));

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.dispatch_complete(&mut ctx);

        assert_eq!(monitor.active_count(), 0);
        assert!(!ctx.has_sample());
        assert_eq!(monitor.calls().last().map(String::as_str), Some("dispatch_complete"));
    }

    // =============================================================================
    // Disabled monitor
    // =============================================================================

    #[test]
    fn test_disabled_monitor_touches_nothing() {
        let recording = RecordingMonitor::default();
        recording.disabled.store(true, Ordering::Relaxed);
        let (monitor, listener, mut ctx) = setup(recording);

        listener.request_starting(&mut ctx);
        listener.dispatch_starting(&mut ctx, "X");
        listener.query_starting(&mut ctx);
        listener.query_completing(&mut ctx);
        listener.render_starting(&mut ctx, "page.html");
        listener.render_complete(&mut ctx);
        listener.redispatch_occurring(&mut ctx, "X", "Y");
        listener.dispatch_complete(&mut ctx);
        listener.request_completing(&mut ctx);
        let instruction = listener.exception_in_run_query(&mut ctx);

        assert_eq!(instruction, ListenerInstruction::DoNothing);
        assert!(!ctx.has_sample());
        assert!(monitor.calls().is_empty());
        assert!(monitor.processed().is_empty());
    }

    #[test]
    fn test_disabled_monitor_leaves_existing_sample_alone() {
        let recording = RecordingMonitor::default();
        recording.disabled.store(true, Ordering::Relaxed);
        let (_monitor, listener, mut ctx) = setup(recording);
        ctx.sample();

        listener.exception_in_execute_batch(&mut ctx);
        listener.request_completing(&mut ctx);

        assert!(ctx.has_sample());
        assert_eq!(ctx.current_sample().unwrap().query_exceptions(), 0);
    }

    // =============================================================================
    // Database hooks
    // =============================================================================

    #[test]
    fn test_exceptions_are_counted_and_never_instruct() {
        let (_monitor, listener, mut ctx) = setup(RecordingMonitor::default());

        assert_eq!(listener.exception_in_run_query(&mut ctx), ListenerInstruction::DoNothing);
        assert_eq!(
            listener.exception_in_run_update_query(&mut ctx),
            ListenerInstruction::DoNothing
        );
        assert_eq!(
            listener.exception_in_execute_batch(&mut ctx),
            ListenerInstruction::DoNothing
        );
        assert_eq!(ctx.current_sample().unwrap().query_exceptions(), 3);
    }

    #[test]
    fn test_scoped_listener_routes_to_request_sample() {
        let monitor = Arc::new(RecordingMonitor::default());
        let listener = Arc::new(MonitorListener::new(monitor.clone()));
        let scope = RequestScope::new(RequestContext::new(1, Uuid::new_v4(), "GET", "/db"));
        let scoped = ScopedMonitorListener::new(listener, scope.clone());

        scoped.query_starting();
        scoped.query_completing();
        let instruction = scoped.exception_in_run_query(&DbError::Query("syntax".to_string()));

        assert_eq!(instruction, ListenerInstruction::DoNothing);
        let ctx = scope.lock();
        let sample = ctx.current_sample().unwrap();
        assert_eq!(sample.query_count(), 1);
        assert_eq!(sample.query_exceptions(), 1);
        assert_eq!(monitor.calls(), vec!["query_starting"]);
    }
}
