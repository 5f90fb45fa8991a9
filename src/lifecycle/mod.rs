//! Startup tasks that must succeed before the HTTP listener is bound.

mod connectivity;

use async_trait::async_trait;

use crate::db::{ConnectorFactory, DbError};

pub use connectivity::DatabaseConnectionTest;

/// Fatal startup failures. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum InitializationError {
    #[error("Unable to verify database connectivity")]
    ConnectivityFailure {
        #[source]
        cause: DbError,
    },

    #[error("No results from query")]
    NoResult,

    #[error("Return value mismatch. Received {actual}; expected {expected}")]
    ValueMismatch { expected: String, actual: String },
}

/// What initialization tasks may use.
pub struct InitContext<'a> {
    pub connectors: &'a dyn ConnectorFactory,
}

#[async_trait]
pub trait InitializationTask: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize(&self, ctx: &InitContext<'_>) -> Result<(), InitializationError>;
}

/// Run tasks in order, stopping at the first failure.
pub async fn run_initialization(
    tasks: &[Box<dyn InitializationTask>],
    ctx: &InitContext<'_>,
) -> Result<(), InitializationError> {
    for task in tasks {
        tracing::debug!(task = task.name(), "Running initialization task");
        if let Err(e) = task.initialize(ctx).await {
            let cause = std::error::Error::source(&e).map(ToString::to_string);
            tracing::error!(task = task.name(), error = %e, cause = ?cause, "Initialization failed");
            return Err(e);
        }
    }
    Ok(())
}
