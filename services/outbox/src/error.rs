use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

/// Outbox service error variants.
#[derive(Debug, thiserror::Error)]
pub enum OutboxServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("outbox entry not found")]
    EntryNotFound,
    #[error("reconcile run {run_id} failed")]
    ReconcileFailed {
        run_id: Uuid,
        #[source]
        source: anyhow::Error,
    },
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl OutboxServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::EntryNotFound => "ENTRY_NOT_FOUND",
            Self::ReconcileFailed { .. } => "RECONCILE_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

/// Malformed or mistyped JSON bodies are client errors like any other.
impl From<JsonRejection> for OutboxServiceError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl IntoResponse for OutboxServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::EntryNotFound => StatusCode::NOT_FOUND,
            Self::ReconcileFailed { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // TraceLayer records every request; only 500s need the error chain.
        match &self {
            Self::Internal(e) => {
                tracing::error!(error = %format!("{e:#}"), kind = "INTERNAL", "internal error");
            }
            Self::ReconcileFailed { run_id, source } => {
                tracing::error!(
                    %run_id,
                    error = %format!("{source:#}"),
                    kind = "RECONCILE_FAILED",
                    "reconcile failed"
                );
            }
            _ => {}
        }
        let mut body = serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        if let Self::ReconcileFailed { run_id, .. } = &self {
            body["reconcileRunId"] = serde_json::json!(run_id);
        }
        (status, axum::Json(body)).into_response()
    }
}
