use chrono::{DateTime, Duration, Utc};

use courier_domain::status::OutboxStatus;

use crate::domain::repository::OutboxRepository;
use crate::domain::types::{Lease, OutboxEntry};
use crate::error::OutboxServiceError;

pub struct ClaimBatchInput {
    pub integration_id: String,
    pub worker_id: String,
    pub limit: u64,
    pub lease_duration: Duration,
}

pub struct ClaimBatchUseCase<R: OutboxRepository> {
    pub repo: R,
}

impl<R: OutboxRepository> ClaimBatchUseCase<R> {
    pub async fn execute(
        &self,
        input: ClaimBatchInput,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        self.execute_at(Utc::now(), input).await
    }

    /// Claim up to `limit` eligible entries for `worker_id`.
    ///
    /// Returns the claimed entries as they stand after the lease write.
    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        input: ClaimBatchInput,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        if input.limit == 0 {
            return Ok(Vec::new());
        }

        // 1. Scan eligible entries, oldest next_attempt_at first
        let candidates = self
            .repo
            .list_eligible(&input.integration_id, now, input.limit)
            .await?;

        let lease = Lease {
            owner: input.worker_id,
            expires_at: now + input.lease_duration,
        };

        // 2. Conditional update per entry; a lost race skips the entry
        let mut claimed = Vec::with_capacity(candidates.len());
        for mut entry in candidates {
            if !self.repo.try_lease(entry.id, entry.status, &lease, now).await? {
                tracing::debug!(
                    entry_id = %entry.id,
                    worker_id = %lease.owner,
                    "entry claimed by another worker"
                );
                continue;
            }
            entry.status = OutboxStatus::Leased;
            entry.lease_owner = Some(lease.owner.clone());
            entry.lease_expires_at = Some(lease.expires_at);
            entry.updated_at = now;
            claimed.push(entry);
        }

        Ok(claimed)
    }
}
