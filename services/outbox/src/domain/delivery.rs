#![allow(async_fn_in_trait)]

use std::time::Duration;

/// One call to an external integration.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryRequest<'a> {
    pub integration_id: &'a str,
    pub operation: &'a str,
    pub idempotency_key: &'a str,
    /// Canonical JSON text.
    pub payload: &'a str,
}

/// Successful delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub detail: String,
}

/// Failed delivery, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("retryable delivery failure: {detail}")]
    Retryable {
        detail: String,
        /// Minimum wait requested by the remote side.
        retry_after: Option<Duration>,
    },
    #[error("permanent delivery failure: {detail}")]
    Permanent { detail: String },
}

impl DeliveryError {
    pub fn retryable(detail: impl Into<String>) -> Self {
        Self::Retryable {
            detail: detail.into(),
            retry_after: None,
        }
    }

    pub fn permanent(detail: impl Into<String>) -> Self {
        Self::Permanent {
            detail: detail.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::retryable(format!("delivery timed out after {}s", after.as_secs()))
    }
}

/// Performs the side effect against an external integration.
///
/// Implementations must be safe to call more than once with the same
/// idempotency key: a premature lease reclaim can re-deliver an entry.
pub trait DeliveryAdapter: Send + Sync {
    async fn deliver(&self, request: DeliveryRequest<'_>)
    -> Result<DeliveryReceipt, DeliveryError>;
}
