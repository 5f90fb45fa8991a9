//! Database round-trip endpoint.
//!
//! Runs the configured test query through the connector factory with the
//! request's monitor listener attached, so query timings and failures land
//! on this request's sample.

use std::sync::Arc;

use axum::{extract::State, Extension, Json};
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::middleware::RequestId;
use crate::monitor::{RequestScope, ScopedMonitorListener};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    /// True when the test column holds the expected value
    pub healthy: bool,
    pub value: Option<String>,
    pub identifier_quote: Option<String>,
}

#[instrument(name = "db::ping", skip_all, fields(request_id = %request_id.0))]
pub async fn ping(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Json<PingResponse>, AppError> {
    let init = &state.config.initialization;

    let mut connector = state.connectors.connector(&init.test_query);
    connector.set_listener(Arc::new(ScopedMonitorListener::new(
        state.listener.clone(),
        scope,
    )));
    connector.run_query().await?;

    let value = connector
        .more()
        .then(|| connector.get_field(&init.test_column, ""));

    Ok(Json(PingResponse {
        healthy: value.as_deref() == Some(init.test_value.as_str()),
        value,
        identifier_quote: state.connectors.identifier_quote(),
    }))
}
