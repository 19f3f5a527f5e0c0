use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::repository::{OutboxRepository, ReconcileRunRepository};
use crate::domain::types::ReconcileRun;
use crate::error::OutboxServiceError;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub stale_threshold: Duration,
    /// Upper bound on drifted entries repaired per sweep.
    pub max_items: u64,
}

/// Serializes reconcile runs per integration within this process.
///
/// Shared by the scheduler and the HTTP handler.
#[derive(Clone, Default)]
pub struct IntegrationLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl IntegrationLocks {
    pub async fn acquire(&self, integration_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(integration_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}

#[derive(Debug, Default)]
struct SweepTally {
    checked: u32,
    drift_fixed: u32,
}

pub struct ReconcileUseCase<R, S>
where
    R: OutboxRepository,
    S: ReconcileRunRepository,
{
    pub entries: R,
    pub runs: S,
    pub settings: ReconcileSettings,
}

impl<R, S> ReconcileUseCase<R, S>
where
    R: OutboxRepository,
    S: ReconcileRunRepository,
{
    pub async fn execute(&self, integration_id: &str) -> Result<ReconcileRun, OutboxServiceError> {
        self.execute_at(Utc::now(), integration_id).await
    }

    /// Sweep one integration for drift and record the run.
    ///
    /// Callers serialize runs per integration. Entries repaired before a
    /// failure stay repaired; the run is marked `failed` with the error as notes.
    pub async fn execute_at(
        &self,
        now: DateTime<Utc>,
        integration_id: &str,
    ) -> Result<ReconcileRun, OutboxServiceError> {
        // 1. Validate
        if integration_id.trim().is_empty() {
            return Err(OutboxServiceError::validation("integrationId is required"));
        }

        // 2. Open the run
        let run = self.runs.start(integration_id, now).await?;
        let run_id = run.id;

        // 3. Sweep, keeping partial counts if it fails midway
        let mut tally = SweepTally::default();
        let swept = self.sweep(now, integration_id, &mut tally).await;

        // 4. Finalise exactly once; a run that cannot be completed is marked failed
        let failure = match swept {
            Ok(()) => {
                let completed = run.clone().completed(tally.checked, tally.drift_fixed, now);
                match self.runs.finish(&completed).await {
                    Ok(finished) => {
                        if !finished {
                            tracing::warn!(%run_id, "reconcile run already finalised");
                        }
                        tracing::info!(
                            %run_id,
                            integration_id,
                            checked = completed.checked,
                            drift_fixed = completed.drift_fixed,
                            "reconcile sweep completed"
                        );
                        return Ok(completed);
                    }
                    Err(e) => e,
                }
            }
            Err(e) => e,
        };
        Err(self.fail_run(run, integration_id, &tally, failure, now).await)
    }

    /// Record `run` as failed and build the error returned to the caller.
    async fn fail_run(
        &self,
        run: ReconcileRun,
        integration_id: &str,
        tally: &SweepTally,
        error: OutboxServiceError,
        now: DateTime<Utc>,
    ) -> OutboxServiceError {
        let run_id = run.id;
        let source = match error {
            OutboxServiceError::Internal(inner) => inner,
            other => anyhow::Error::new(other),
        };
        let run = run.failed(tally.checked, tally.drift_fixed, format!("{source:#}"), now);
        if let Err(finish_err) = self.runs.finish(&run).await {
            tracing::error!(
                %run_id,
                error = %format!("{finish_err:#}"),
                "failed to mark reconcile run failed"
            );
        }
        tracing::warn!(
            %run_id,
            integration_id,
            checked = run.checked,
            drift_fixed = run.drift_fixed,
            error = %format!("{source:#}"),
            "reconcile sweep failed"
        );
        OutboxServiceError::ReconcileFailed { run_id, source }
    }

    async fn sweep(
        &self,
        now: DateTime<Utc>,
        integration_id: &str,
        tally: &mut SweepTally,
    ) -> Result<(), OutboxServiceError> {
        let drifted = self
            .entries
            .list_drifted(
                integration_id,
                now,
                self.settings.stale_threshold,
                self.settings.max_items,
            )
            .await?;

        for entry in drifted {
            tally.checked += 1;
            let Some(drift) = entry.drift(now, self.settings.stale_threshold) else {
                continue;
            };
            if self.entries.requeue(&entry, now).await? {
                tally.drift_fixed += 1;
                tracing::debug!(
                    entry_id = %entry.id,
                    integration_id,
                    drift = drift.as_str(),
                    "drifted entry requeued"
                );
            } else {
                tracing::debug!(
                    entry_id = %entry.id,
                    drift = drift.as_str(),
                    "entry changed before repair, skipped"
                );
            }
        }
        Ok(())
    }
}
