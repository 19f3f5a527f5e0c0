use std::time::Duration as StdDuration;

use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::domain::backoff::{RetryDecision, RetryPolicy};
use crate::domain::delivery::{DeliveryAdapter, DeliveryError, DeliveryRequest};
use crate::domain::repository::OutboxRepository;
use crate::domain::types::{Completion, OutboxEntry, truncate_error};
use crate::error::OutboxServiceError;
use crate::usecase::lease::{ClaimBatchInput, ClaimBatchUseCase};

/// Knobs for one dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub retry: RetryPolicy,
    pub lease_duration: Duration,
    pub delivery_timeout: StdDuration,
}

pub struct DispatchInput {
    pub integration_id: String,
    pub worker_id: String,
    pub limit: u64,
}

/// Result of dispatching one claimed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    RetryScheduled { next_attempt_at: DateTime<Utc> },
    DeadLettered,
    /// The lease moved on before the outcome could be written.
    LeaseLost,
}

/// Counts for one claim + dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub claimed: u32,
    pub delivered: u32,
    pub retry_scheduled: u32,
    pub dead_lettered: u32,
    pub lease_lost: u32,
}

impl DispatchReport {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Delivered => self.delivered += 1,
            DispatchOutcome::RetryScheduled { .. } => self.retry_scheduled += 1,
            DispatchOutcome::DeadLettered => self.dead_lettered += 1,
            DispatchOutcome::LeaseLost => self.lease_lost += 1,
        }
    }
}

pub struct DispatchUseCase<R, D>
where
    R: OutboxRepository + Clone,
    D: DeliveryAdapter,
{
    pub repo: R,
    pub adapter: D,
    pub settings: DispatchSettings,
}

/// Wall clock for one batch: the claim time advanced by elapsed monotonic time.
#[derive(Debug, Clone, Copy)]
pub struct BatchClock {
    started_at: DateTime<Utc>,
    origin: Instant,
}

impl BatchClock {
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.origin.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.started_at + elapsed
    }
}

impl<R, D> DispatchUseCase<R, D>
where
    R: OutboxRepository + Clone,
    D: DeliveryAdapter,
{
    pub async fn execute(&self, input: DispatchInput) -> Result<DispatchReport, OutboxServiceError> {
        self.execute_at(Utc::now(), input).await
    }

    /// Claim one batch and dispatch every claimed entry.
    ///
    /// Store failures while recording a single outcome are logged and skipped;
    /// the entry stays leased until the reconciler reclaims it. Entries are
    /// dispatched in order, each against the time the batch has taken so far.
    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        input: DispatchInput,
    ) -> Result<DispatchReport, OutboxServiceError> {
        let clock = BatchClock::start(now);
        let claim = ClaimBatchUseCase {
            repo: self.repo.clone(),
        };
        let claimed = claim
            .execute_at(
                now,
                ClaimBatchInput {
                    integration_id: input.integration_id,
                    worker_id: input.worker_id.clone(),
                    limit: input.limit,
                    lease_duration: self.settings.lease_duration,
                },
            )
            .await?;

        let mut report = DispatchReport {
            claimed: claimed.len() as u32,
            ..Default::default()
        };
        for entry in &claimed {
            match self.dispatch_entry(clock, entry, &input.worker_id).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => tracing::error!(
                    entry_id = %entry.id,
                    worker_id = %input.worker_id,
                    error = %format!("{e:#}"),
                    "failed to record dispatch outcome"
                ),
            }
        }
        Ok(report)
    }

    /// Deliver one leased entry and write the outcome under the lease.
    ///
    /// The adapter is not called unless the whole delivery timeout fits in
    /// what is left of the lease; such an entry is reported as `LeaseLost`
    /// and left for the reconciler.
    pub async fn dispatch_entry(
        &self,
        clock: BatchClock,
        entry: &OutboxEntry,
        worker_id: &str,
    ) -> Result<DispatchOutcome, OutboxServiceError> {
        // 1. Check the lease still covers a full attempt
        let timeout = self.settings.delivery_timeout;
        let start = clock.now();
        let deadline = start + Duration::from_std(timeout).context("delivery timeout out of range")?;
        if entry.lease_expires_at.is_none_or(|expires_at| expires_at < deadline) {
            tracing::debug!(
                entry_id = %entry.id,
                worker_id,
                lease_expires_at = ?entry.lease_expires_at,
                "lease too short for another attempt, entry skipped"
            );
            return Ok(DispatchOutcome::LeaseLost);
        }

        // 2. Call the adapter with an explicit timeout; a timeout is retryable
        let request = DeliveryRequest {
            integration_id: &entry.integration_id,
            operation: &entry.operation,
            idempotency_key: &entry.idempotency_key,
            payload: &entry.payload,
        };
        let result = tokio::time::timeout(timeout, self.adapter.deliver(request))
            .await
            .unwrap_or_else(|_| Err(DeliveryError::timed_out(timeout)));
        let now = clock.now();

        // 3. Classify; every attempt counts, success included
        let attempt_count = entry.attempt_count.saturating_add(1);
        let completion = match &result {
            Ok(_) => Completion::Delivered { attempt_count },
            Err(DeliveryError::Permanent { detail }) => Completion::DeadLettered {
                attempt_count,
                last_error: truncate_error(detail),
            },
            Err(DeliveryError::Retryable {
                detail,
                retry_after,
            }) => match self.settings.retry.decide(attempt_count, *retry_after) {
                RetryDecision::Retry { delay } => Completion::RetryScheduled {
                    attempt_count,
                    next_attempt_at: Duration::from_std(delay)
                        .ok()
                        .and_then(|delay| now.checked_add_signed(delay))
                        .context("backoff delay out of range")?,
                    last_error: truncate_error(detail),
                },
                RetryDecision::Exhausted => Completion::DeadLettered {
                    attempt_count,
                    last_error: truncate_error(detail),
                },
            },
        };

        // 4. Conditional write guarded by lease ownership
        if !self
            .repo
            .complete(entry.id, worker_id, &completion, now)
            .await?
        {
            tracing::debug!(
                entry_id = %entry.id,
                worker_id,
                "lease lost before completion, outcome dropped"
            );
            return Ok(DispatchOutcome::LeaseLost);
        }

        let outcome = match completion {
            Completion::Delivered { .. } => {
                tracing::debug!(
                    entry_id = %entry.id,
                    integration_id = %entry.integration_id,
                    attempt_count,
                    detail = result.as_ref().map(|r| r.detail.as_str()).unwrap_or_default(),
                    "entry delivered"
                );
                DispatchOutcome::Delivered
            }
            Completion::RetryScheduled {
                next_attempt_at,
                ref last_error,
                ..
            } => {
                tracing::warn!(
                    entry_id = %entry.id,
                    integration_id = %entry.integration_id,
                    attempt_count,
                    %next_attempt_at,
                    error = %last_error,
                    "delivery failed, retry scheduled"
                );
                DispatchOutcome::RetryScheduled { next_attempt_at }
            }
            Completion::DeadLettered { ref last_error, .. } => {
                tracing::warn!(
                    entry_id = %entry.id,
                    integration_id = %entry.integration_id,
                    attempt_count,
                    error = %last_error,
                    "entry dead-lettered"
                );
                DispatchOutcome::DeadLettered
            }
        };
        Ok(outcome)
    }
}
