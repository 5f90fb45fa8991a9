//! Postgres connectors backed by sqlx.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Connection, Postgres, Row, TypeInfo};

use crate::config::DatabaseConfig;

use super::{
    column_index, ConnectorFactory, DatabaseConnectionListener, DatabaseConnector, DbError,
    ListenerInstruction,
};

/// Query used to learn the server's identifier quote character.
const QUOTE_PROBE_QUERY: &str = "SELECT quote_ident('a b')";

struct PgBackend {
    pool: PgPool,
    options: PgConnectOptions,
}

/// Connector factory over a lazily-connected Postgres pool.
///
/// When the database is disabled in configuration no pool is created and
/// every connector fails with [`DbError::Disabled`].
pub struct PgConnectorFactory {
    backend: Option<Arc<PgBackend>>,
    identifier_quote: OnceLock<String>,
}

impl PgConnectorFactory {
    pub fn new(config: &DatabaseConfig) -> Result<Self, DbError> {
        if !config.enabled {
            return Ok(Self::disabled());
        }

        let options: PgConnectOptions = config.url.parse()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy_with(options.clone());

        Ok(Self {
            backend: Some(Arc::new(PgBackend { pool, options })),
            identifier_quote: OnceLock::new(),
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            identifier_quote: OnceLock::new(),
        }
    }
}

#[async_trait]
impl ConnectorFactory for PgConnectorFactory {
    fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    fn connector(&self, query: &str) -> Box<dyn DatabaseConnector> {
        Box::new(PgConnector {
            query: query.to_string(),
            backend: self.backend.clone(),
            force_new_connection: false,
            listener: None,
            rows: Vec::new(),
            cursor: 0,
        })
    }

    async fn determine_identifier_quote_string(&self) {
        let Some(backend) = &self.backend else {
            return;
        };

        match sqlx::query_scalar::<_, String>(QUOTE_PROBE_QUERY)
            .fetch_one(&backend.pool)
            .await
        {
            Ok(quoted) => {
                let quote = quoted.chars().next().map(String::from).unwrap_or_default();
                tracing::debug!(quote = %quote, "Determined identifier quote string");
                if self.identifier_quote.set(quote).is_err() {
                    tracing::debug!("Identifier quote string already determined");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to determine identifier quote string");
            }
        }
    }

    fn identifier_quote(&self) -> Option<String> {
        self.identifier_quote.get().cloned()
    }
}

/// A connection checked out for one operation.
enum Lease {
    Dedicated(PgConnection),
    Pooled(PoolConnection<Postgres>),
}

impl Lease {
    fn conn(&mut self) -> &mut PgConnection {
        match self {
            Lease::Dedicated(conn) => conn,
            Lease::Pooled(conn) => &mut **conn,
        }
    }
}

/// Which listener hook reports a failure.
#[derive(Clone, Copy)]
enum Operation {
    Query,
    Update,
    Batch,
}

pub struct PgConnector {
    query: String,
    backend: Option<Arc<PgBackend>>,
    force_new_connection: bool,
    listener: Option<Arc<dyn DatabaseConnectionListener>>,
    rows: Vec<PgRow>,
    cursor: usize,
}

impl PgConnector {
    async fn lease(&self) -> Result<Lease, DbError> {
        let backend = self.backend.as_ref().ok_or(DbError::Disabled)?;
        if self.force_new_connection {
            let conn = PgConnection::connect_with(&backend.options).await?;
            Ok(Lease::Dedicated(conn))
        } else {
            Ok(Lease::Pooled(backend.pool.acquire().await?))
        }
    }

    async fn fetch_rows(&self) -> Result<Vec<PgRow>, DbError> {
        let mut lease = self.lease().await?;
        Ok(sqlx::query(&self.query).fetch_all(lease.conn()).await?)
    }

    async fn execute(&self) -> Result<u64, DbError> {
        let mut lease = self.lease().await?;
        let result = sqlx::query(&self.query).execute(lease.conn()).await?;
        Ok(result.rows_affected())
    }

    async fn execute_all(&self, statements: &[String]) -> Result<u64, DbError> {
        let mut lease = self.lease().await?;
        let mut tx = lease.conn().begin().await?;
        let mut affected = 0;
        for statement in statements {
            affected += sqlx::query(statement).execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(affected)
    }

    fn query_starting(&self) {
        if let Some(listener) = &self.listener {
            listener.query_starting();
        }
    }

    fn query_completing(&self) {
        if let Some(listener) = &self.listener {
            listener.query_completing();
        }
    }

    /// Report a failure and decide whether to try once more.
    fn should_retry(&self, operation: Operation, error: &DbError, attempt: u32) -> bool {
        let Some(listener) = &self.listener else {
            return false;
        };
        let instruction = match operation {
            Operation::Query => listener.exception_in_run_query(error),
            Operation::Update => listener.exception_in_run_update_query(error),
            Operation::Batch => listener.exception_in_execute_batch(error),
        };
        instruction == ListenerInstruction::Retry && attempt == 0
    }

    fn current_row(&self) -> Option<&PgRow> {
        self.rows.get(self.cursor)
    }
}

#[async_trait]
impl DatabaseConnector for PgConnector {
    fn set_force_new_connection(&mut self, force: bool) {
        self.force_new_connection = force;
    }

    fn set_listener(&mut self, listener: Arc<dyn DatabaseConnectionListener>) {
        self.listener = Some(listener);
    }

    async fn run_query(&mut self) -> Result<(), DbError> {
        self.rows.clear();
        self.cursor = 0;

        let mut attempt = 0;
        loop {
            self.query_starting();
            let result = self.fetch_rows().await;
            self.query_completing();

            match result {
                Ok(rows) => {
                    self.rows = rows;
                    return Ok(());
                }
                Err(e) if self.should_retry(Operation::Query, &e, attempt) => {
                    tracing::debug!(error = %e, "Retrying query");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn run_update_query(&mut self) -> Result<u64, DbError> {
        let mut attempt = 0;
        loop {
            self.query_starting();
            let result = self.execute().await;
            self.query_completing();

            match result {
                Ok(affected) => return Ok(affected),
                Err(e) if self.should_retry(Operation::Update, &e, attempt) => {
                    tracing::debug!(error = %e, "Retrying update");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute_batch(&mut self, statements: &[String]) -> Result<u64, DbError> {
        let mut attempt = 0;
        loop {
            self.query_starting();
            let result = self.execute_all(statements).await;
            self.query_completing();

            match result {
                Ok(affected) => return Ok(affected),
                Err(e) if self.should_retry(Operation::Batch, &e, attempt) => {
                    tracing::debug!(error = %e, statements = statements.len(), "Retrying batch");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn more(&self) -> bool {
        self.cursor < self.rows.len()
    }

    fn next_row(&mut self) {
        if self.more() {
            self.cursor += 1;
        }
    }

    fn get_field(&self, column: &str, default: &str) -> String {
        self.current_row()
            .and_then(|row| {
                let index = column_index(row.columns().iter().map(|c| c.name()), column)?;
                field_as_string(row, index)
            })
            .unwrap_or_else(|| default.to_string())
    }
}

/// Render a column of the row as text, decoding by its Postgres type.
fn field_as_string(row: &PgRow, index: usize) -> Option<String> {
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "INT2" => row.try_get::<Option<i16>, _>(index).ok().flatten().map(|v| v.to_string()),
        "INT4" => row.try_get::<Option<i32>, _>(index).ok().flatten().map(|v| v.to_string()),
        "INT8" => row.try_get::<Option<i64>, _>(index).ok().flatten().map(|v| v.to_string()),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index).ok().flatten().map(|v| v.to_string()),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index).ok().flatten().map(|v| v.to_string()),
        "BOOL" => row.try_get::<Option<bool>, _>(index).ok().flatten().map(|v| v.to_string()),
        _ => row.try_get::<Option<String>, _>(index).ok().flatten(),
    }
}
