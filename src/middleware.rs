//! Request monitoring middleware.
//!
//! Generates a UUID v4 for each incoming request, creates a tracing span that
//! wraps the request, and drives the monitor listener through the request
//! lifecycle. The request's `RequestScope` is placed in the extensions so
//! handlers can report render and query activity on the same sample.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

use crate::monitor::{RequestContext, RequestScope};
use crate::state::AppState;

/// Extension type for accessing request ID in handlers if needed.
#[derive(Clone, Debug)]
pub struct RequestId(pub Uuid);

/// Middleware that samples a routed request.
///
/// Installed with `route_layer` so the matched route is known; the route
/// pattern is used as the dispatch command.
pub async fn monitor_layer(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4();
    let request_number = state.next_request_number();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let command = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        request_number,
        method = %method,
        path = %path,
        duration_ms = tracing::field::Empty,
    );

    let start = Instant::now();
    let scope = RequestScope::new(RequestContext::new(
        request_number,
        request_id,
        method.as_str(),
        &path,
    ));

    let mut request = request;
    request.extensions_mut().insert(RequestId(request_id));
    request.extensions_mut().insert(scope.clone());

    let listener = state.listener.clone();
    async move {
        {
            let mut ctx = scope.lock();
            listener.request_starting(&mut ctx);
            listener.dispatch_starting(&mut ctx, &command);
        }

        let response = next.run(request).await;

        {
            let mut ctx = scope.lock();
            listener.dispatch_complete(&mut ctx);
            listener.request_completing(&mut ctx);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("duration_ms", duration_ms);
        tracing::info!(
            status = response.status().as_u16(),
            duration_ms,
            "Request completed"
        );

        response
    }
    .instrument(span)
    .await
}
