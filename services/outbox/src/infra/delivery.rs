use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};

use crate::domain::delivery::{DeliveryAdapter, DeliveryError, DeliveryReceipt, DeliveryRequest};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Floor applied to a 429 that carries no `Retry-After`.
pub const DEFAULT_RATE_LIMIT_FLOOR: Duration = Duration::from_secs(60);

/// Longest response body excerpt kept in a failure detail.
const DETAIL_MAX_CHARS: usize = 512;

/// Delivers outbox payloads to a delivery gateway over HTTP.
///
/// `POST {base_url}/{integration_id}/{operation}` with the canonical payload as
/// the JSON body and the entry's idempotency key in `Idempotency-Key`.
#[derive(Clone)]
pub struct HttpDeliveryAdapter {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpDeliveryAdapter {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build delivery http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token,
        })
    }

    fn url(&self, integration_id: &str, operation: &str) -> String {
        format!("{}/{}/{}", self.base_url, integration_id, operation)
    }
}

impl DeliveryAdapter for HttpDeliveryAdapter {
    async fn deliver(
        &self,
        request: DeliveryRequest<'_>,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let mut builder = self
            .client
            .post(self.url(request.integration_id, request.operation))
            .header(CONTENT_TYPE, "application/json")
            .header(IDEMPOTENCY_KEY_HEADER, request.idempotency_key)
            .body(request.payload.to_owned());
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DeliveryError::retryable(format!("transport error: {e}")))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        classify(status, retry_after, &body)
    }
}

/// Map a gateway response onto a delivery outcome.
///
/// 2xx succeeds. 408, 429 and 5xx are retryable. Every other status is permanent.
pub fn classify(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> Result<DeliveryReceipt, DeliveryError> {
    let detail = describe(status, body);
    if status.is_success() {
        return Ok(DeliveryReceipt { detail });
    }
    match status {
        StatusCode::TOO_MANY_REQUESTS => Err(DeliveryError::Retryable {
            detail,
            retry_after: Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_FLOOR)),
        }),
        StatusCode::REQUEST_TIMEOUT => Err(DeliveryError::Retryable {
            detail,
            retry_after,
        }),
        s if s.is_server_error() => Err(DeliveryError::Retryable {
            detail,
            retry_after,
        }),
        _ => Err(DeliveryError::Permanent { detail }),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn describe(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        return format!("gateway responded {status}");
    }
    let excerpt: String = body.chars().take(DETAIL_MAX_CHARS).collect();
    format!("gateway responded {status}: {excerpt}")
}
