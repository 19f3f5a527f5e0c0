use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use courier_domain::status::OutboxStatus;

use crate::domain::idempotency::CanonicalRequest;
use crate::domain::repository::OutboxRepository;
use crate::domain::types::{NewOutboxEntry, OutboxEntry};
use crate::error::OutboxServiceError;

/// Raw delivery request; fields are optional so absence maps to a validation error.
#[derive(Debug, Clone, Default)]
pub struct EnqueueInput {
    pub integration_id: Option<String>,
    pub operation: Option<String>,
    pub stable_resource_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutput {
    pub entry_id: Uuid,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    /// `false` when an entry with the same key already existed.
    pub created: bool,
}

impl EnqueueOutput {
    fn existing(entry: OutboxEntry) -> Self {
        Self {
            entry_id: entry.id,
            idempotency_key: entry.idempotency_key,
            status: entry.status,
            created: false,
        }
    }
}

pub struct EnqueueUseCase<R: OutboxRepository> {
    pub repo: R,
}

impl<R: OutboxRepository> EnqueueUseCase<R> {
    pub async fn execute(&self, input: EnqueueInput) -> Result<EnqueueOutput, OutboxServiceError> {
        self.execute_at(Utc::now(), input).await
    }

    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        input: EnqueueInput,
    ) -> Result<EnqueueOutput, OutboxServiceError> {
        // 1. Validate and derive the idempotency key → 400 on missing fields
        let request = CanonicalRequest::new(
            input.integration_id.as_deref(),
            input.operation.as_deref(),
            input.stable_resource_id.as_deref(),
            input.payload.as_ref(),
        )?;

        // 2. Existing entry wins; never touch its progress
        if let Some(existing) = self
            .repo
            .find_by_idempotency_key(&request.idempotency_key)
            .await?
        {
            return Ok(EnqueueOutput::existing(existing));
        }

        // 3. Insert queued entry, eligible immediately
        let new_entry = NewOutboxEntry {
            integration_id: request.integration_id,
            operation: request.operation,
            stable_resource_id: request.stable_resource_id,
            payload: request.payload,
            idempotency_key: request.idempotency_key,
            created_at: now,
        };
        if let Some(created) = self.repo.create(&new_entry).await? {
            tracing::debug!(
                entry_id = %created.id,
                integration_id = %created.integration_id,
                operation = %created.operation,
                "outbox entry enqueued"
            );
            return Ok(EnqueueOutput {
                entry_id: created.id,
                idempotency_key: created.idempotency_key,
                status: created.status,
                created: true,
            });
        }

        // 4. Lost an insert race on the unique key → return the winner
        let winner = self
            .repo
            .find_by_idempotency_key(&new_entry.idempotency_key)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "idempotency key {} conflicted but no entry was found",
                    new_entry.idempotency_key
                )
            })?;
        Ok(EnqueueOutput::existing(winner))
    }
}
