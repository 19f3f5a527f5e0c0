use std::fmt::Display;

use axum::http::StatusCode;

/// Liveness check for `GET /healthz`.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Map a readiness probe (e.g. a database ping) to the `GET /readyz` status.
///
/// Failures answer 503 so the orchestrator stops routing traffic without
/// restarting the process.
pub fn readiness<E: Display>(probe: Result<(), E>) -> StatusCode {
    match probe {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            ::tracing::warn!(error = %e, "readiness probe failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
