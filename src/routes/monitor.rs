//! Health report handlers.
//!
//! The report is serialized between render hooks so the request that asks
//! for it is sampled like any page with a render stage.

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    Extension,
};
use http::header::CONTENT_TYPE;

use crate::error::AppError;
use crate::monitor::RequestScope;
use crate::state::AppState;

use super::{MONITOR_FORWARD_ROUTE, MONITOR_ROUTE};

/// Template name reported to the render hooks.
const REPORT_VIEW: &str = "monitor/report.json";

/// Current monitor state as JSON.
pub async fn report(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Response, AppError> {
    let report = state.monitor.report();

    let body = {
        let mut ctx = scope.lock();
        state.listener.render_starting(&mut ctx, REPORT_VIEW);
        let body = serde_json::to_string_pretty(&report);
        state.listener.render_complete(&mut ctx);
        body?
    };

    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// Forward to the report without a new external request.
pub async fn forward(
    State(state): State<AppState>,
    Extension(scope): Extension<RequestScope>,
) -> Result<Response, AppError> {
    state
        .listener
        .redispatch_occurring(&mut scope.lock(), MONITOR_FORWARD_ROUTE, MONITOR_ROUTE);
    report(State(state), Extension(scope)).await
}
