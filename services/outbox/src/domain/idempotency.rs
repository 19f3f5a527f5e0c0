//! Stable dedup keys for outbox entries.
//!
//! `key = sha256(len-prefixed integration_id, operation, stable_resource_id, payload_hash)`
//! where `payload_hash = sha256(RFC 8785 canonical JSON of payload)`. Both hashes are
//! lower-case hex, so every key is exactly [`KEY_LEN`] characters.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::OutboxServiceError;

/// Length of a derived idempotency key in hex characters.
pub const KEY_LEN: usize = 64;

/// A validated delivery request with its canonical payload and derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub integration_id: String,
    pub operation: String,
    pub stable_resource_id: String,
    /// RFC 8785 canonical JSON text of the payload.
    pub payload: String,
    pub idempotency_key: String,
}

impl CanonicalRequest {
    /// Validate the four request fields and derive the idempotency key.
    ///
    /// Rejects absent or blank strings and an absent or `null` payload.
    pub fn new(
        integration_id: Option<&str>,
        operation: Option<&str>,
        stable_resource_id: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<Self, OutboxServiceError> {
        let integration_id = required("integrationId", integration_id)?;
        let operation = required("operation", operation)?;
        let stable_resource_id = required("stableResourceId", stable_resource_id)?;
        let payload = match payload {
            Some(Value::Null) | None => {
                return Err(OutboxServiceError::validation("payload is required"));
            }
            Some(value) => value,
        };

        let canonical = canonical_json(payload)?;
        let payload_hash = sha256_hex(canonical.as_bytes());
        let idempotency_key =
            derive_key(integration_id, operation, stable_resource_id, &payload_hash);

        Ok(Self {
            integration_id: integration_id.to_owned(),
            operation: operation.to_owned(),
            stable_resource_id: stable_resource_id.to_owned(),
            payload: canonical,
            idempotency_key,
        })
    }
}

/// Compute the idempotency key for an already-validated request.
pub fn idempotency_key(
    integration_id: &str,
    operation: &str,
    stable_resource_id: &str,
    payload: &Value,
) -> Result<String, OutboxServiceError> {
    CanonicalRequest::new(
        Some(integration_id),
        Some(operation),
        Some(stable_resource_id),
        Some(payload),
    )
    .map(|request| request.idempotency_key)
}

fn required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, OutboxServiceError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(OutboxServiceError::validation(format!("{field} is required"))),
    }
}

fn canonical_json(payload: &Value) -> Result<String, OutboxServiceError> {
    serde_jcs::to_string(payload)
        .map_err(|e| OutboxServiceError::validation(format!("payload is not canonicalizable: {e}")))
}

fn derive_key(
    integration_id: &str,
    operation: &str,
    stable_resource_id: &str,
    payload_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    // Length prefixes keep ("a:b", "c") and ("a", "b:c") apart.
    for part in [integration_id, operation, stable_resource_id, payload_hash] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
