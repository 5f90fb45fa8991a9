//! Database connector abstractions.
//!
//! A `ConnectorFactory` hands out single-use `DatabaseConnector`s, each bound
//! to one query. Connectors report query activity to an optional
//! `DatabaseConnectionListener`, which may instruct the connector to retry a
//! failed statement. The Postgres implementation lives in [`postgres`].

pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

/// Errors raised by connectors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database connections are disabled")]
    Disabled,

    #[error("Query failed: {0}")]
    Query(String),
}

/// What a connector should do after reporting a failed statement to its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerInstruction {
    /// Surface the error to the caller unchanged
    #[default]
    DoNothing,
    /// Run the statement one more time before giving up
    Retry,
}

/// Observer of query activity on a connector.
pub trait DatabaseConnectionListener: Send + Sync {
    fn query_starting(&self);

    fn query_completing(&self);

    fn exception_in_run_query(&self, error: &DbError) -> ListenerInstruction;

    fn exception_in_run_update_query(&self, error: &DbError) -> ListenerInstruction;

    fn exception_in_execute_batch(&self, error: &DbError) -> ListenerInstruction;
}

/// A connector scoped to one query. Any connection it holds is released when
/// the connector is dropped.
#[async_trait]
pub trait DatabaseConnector: Send {
    /// Bypass the pool and open a dedicated connection for this connector.
    fn set_force_new_connection(&mut self, force: bool);

    fn set_listener(&mut self, listener: Arc<dyn DatabaseConnectionListener>);

    /// Run the query and position the cursor on the first row.
    async fn run_query(&mut self) -> Result<(), DbError>;

    /// Run the query as a statement, returning the number of affected rows.
    async fn run_update_query(&mut self) -> Result<u64, DbError>;

    /// Run several statements in one transaction.
    async fn execute_batch(&mut self, statements: &[String]) -> Result<u64, DbError>;

    /// True while the cursor points at a row.
    fn more(&self) -> bool;

    /// Advance the cursor to the next row.
    fn next_row(&mut self);

    /// Value of `column` in the current row rendered as a string, or `default`
    /// when there is no current row, no such column, or the value is NULL.
    fn get_field(&self, column: &str, default: &str) -> String;
}

/// Source of connectors for the application.
#[async_trait]
pub trait ConnectorFactory: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn connector(&self, query: &str) -> Box<dyn DatabaseConnector>;

    /// Ask the server how it quotes identifiers and remember the answer for
    /// later query building. Failures are logged, not returned.
    async fn determine_identifier_quote_string(&self);

    /// The quote detected by `determine_identifier_quote_string`, if it ran.
    fn identifier_quote(&self) -> Option<String>;
}

/// Find `column` among `names`, preferring an exact match and falling back
/// to a case-insensitive one.
pub fn column_index<'a, I>(names: I, column: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    names
        .iter()
        .position(|name| *name == column)
        .or_else(|| names.iter().position(|name| name.eq_ignore_ascii_case(column)))
}
