use axum::{body::Body, http::Request, middleware::Next, response::Response};
use std::fmt;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

/// Per-request identifier, inserted into the request extensions so handlers
/// can tag their log lines with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(pub Uuid);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Assigns a [`RequestId`] and logs every request that ends in a 4xx or 5xx.
pub async fn log_request_errors(mut req: Request<Body>, next: Next) -> Response {
    let request_id = RequestId(Uuid::new_v4());
    req.extensions_mut().insert(request_id);

    let uri = req.uri().clone();
    let method = req.method().clone();
    let started = Instant::now();

    let response = next.run(req).await;
    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status.is_client_error() {
        warn!(
            %request_id,
            method = %method,
            uri = %uri,
            status = %status,
            elapsed_ms,
            "Client error"
        );
    } else if status.is_server_error() {
        error!(
            %request_id,
            method = %method,
            uri = %uri,
            status = %status,
            elapsed_ms,
            "Server error"
        );
    }

    response
}
