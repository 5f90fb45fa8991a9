//! Health check endpoint for container orchestration.
//!
//! Provides a simple liveness probe that returns 200 OK when the process is running.
//! Startup only completes after the database check passes, so a live process
//! has already reached its database once.

/// Health check handler.
pub async fn health() -> &'static str {
    "ok"
}
