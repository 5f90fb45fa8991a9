//! Request-scoped context carrying the sample slot.
//!
//! Each inbound request owns exactly one `RequestContext`. Sampler entry
//! points receive it explicitly instead of looking the sample up through
//! thread-local state, so a request migrating between runtime threads keeps
//! its sample.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use super::sample::MonitorSample;

#[derive(Debug)]
pub struct RequestContext {
    request_number: u64,
    request_id: Uuid,
    method: String,
    path: String,
    sample: Option<MonitorSample>,
}

impl RequestContext {
    pub fn new(request_number: u64, request_id: Uuid, method: &str, path: &str) -> Self {
        Self {
            request_number,
            request_id,
            method: method.to_string(),
            path: path.to_string(),
            sample: None,
        }
    }

    pub fn request_number(&self) -> u64 {
        self.request_number
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The bound sample, created on first access.
    pub fn sample(&mut self) -> &mut MonitorSample {
        self.sample.get_or_insert_with(MonitorSample::new)
    }

    /// The bound sample, if any, without creating one.
    pub fn current_sample(&self) -> Option<&MonitorSample> {
        self.sample.as_ref()
    }

    pub fn has_sample(&self) -> bool {
        self.sample.is_some()
    }

    /// Detach and return the bound sample.
    pub fn take_sample(&mut self) -> Option<MonitorSample> {
        self.sample.take()
    }

    pub fn clear_sample(&mut self) {
        self.sample = None;
    }
}

/// Shared handle to a request's context, stored in request extensions so
/// handlers can reach the sample. Only the request's own task locks it.
#[derive(Clone, Debug)]
pub struct RequestScope(Arc<Mutex<RequestContext>>);

impl RequestScope {
    pub fn new(context: RequestContext) -> Self {
        Self(Arc::new(Mutex::new(context)))
    }

    pub fn lock(&self) -> MutexGuard<'_, RequestContext> {
        // A panic while holding the lock leaves the context usable
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
