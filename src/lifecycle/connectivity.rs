//! Database connectivity check run before the application accepts requests.

use async_trait::async_trait;
use tracing::info;

use crate::config::InitializationConfig;
use crate::db::ConnectorFactory;

use super::{InitContext, InitializationError, InitializationTask};

/// Runs the configured test query on a freshly opened connection and checks
/// one column of the first row against the expected value.
pub struct DatabaseConnectionTest {
    config: InitializationConfig,
}

impl DatabaseConnectionTest {
    pub fn new(config: InitializationConfig) -> Self {
        Self { config }
    }

    /// Skips (successfully) when the factory is disabled or no query is configured.
    pub async fn verify(&self, connectors: &dyn ConnectorFactory) -> Result<(), InitializationError> {
        let query = self.config.test_query.trim();
        if !connectors.is_enabled() || query.is_empty() {
            info!("Skipping database connectivity test.");
            return Ok(());
        }

        info!(query = %query, "Testing database connectivity");

        let mut connector = connectors.connector(query);
        connector.set_force_new_connection(true);
        connector
            .run_query()
            .await
            .map_err(|cause| InitializationError::ConnectivityFailure { cause })?;

        if !connector.more() {
            return Err(InitializationError::NoResult);
        }

        let actual = connector.get_field(&self.config.test_column, "");
        if actual != self.config.test_value {
            return Err(InitializationError::ValueMismatch {
                expected: self.config.test_value.clone(),
                actual,
            });
        }

        info!("Successfully communicated with database");
        connectors.determine_identifier_quote_string().await;
        Ok(())
    }
}

#[async_trait]
impl InitializationTask for DatabaseConnectionTest {
    fn name(&self) -> &'static str {
        "database-connection-test"
    }

    async fn initialize(&self, ctx: &InitContext<'_>) -> Result<(), InitializationError> {
        self.verify(ctx.connectors).await
    }
}
