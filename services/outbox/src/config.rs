use std::time::Duration;

use serde::Deserialize;

use courier_core::config::Config;

use crate::domain::backoff::{MAX_DELAY, RetryPolicy};
use crate::usecase::dispatch::DispatchSettings;
use crate::usecase::reconcile::ReconcileSettings;

/// Outbox service configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct OutboxConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// TCP port to listen on. Env var: `OUTBOX_PORT`.
    #[serde(default = "default_outbox_port")]
    pub outbox_port: u16,
    /// Integrations served by the dispatcher pool and reconcile scheduler (comma list).
    #[serde(default = "default_integrations")]
    pub integrations: Vec<String>,
    /// Retryable failures tolerated before an entry is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Must exceed `delivery_timeout_secs`.
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Age after which an unclaimed queue entry counts as drift.
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: u64,
    #[serde(default = "default_claim_batch_size")]
    pub claim_batch_size: u64,
    /// Dispatcher workers per integration.
    #[serde(default = "default_dispatcher_workers")]
    pub dispatcher_workers: u32,
    #[serde(default = "default_dispatch_poll_interval_secs")]
    pub dispatch_poll_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_reconcile_max_items")]
    pub reconcile_max_items: u64,
    /// Base URL of the delivery gateway (e.g. "http://integrations-gateway:8080").
    pub delivery_gateway_url: String,
    /// Optional bearer token sent to the delivery gateway.
    #[serde(default)]
    pub delivery_gateway_token: Option<String>,
}

impl Config for OutboxConfig {}

fn default_outbox_port() -> u16 {
    3120
}

fn default_integrations() -> Vec<String> {
    vec!["slack".to_owned()]
}

fn default_max_attempts() -> u32 {
    8
}

fn default_backoff_base_secs() -> u64 {
    5
}

fn default_backoff_max_secs() -> u64 {
    3600
}

fn default_lease_duration_secs() -> u64 {
    300
}

fn default_delivery_timeout_secs() -> u64 {
    30
}

fn default_stale_threshold_secs() -> u64 {
    6 * 60 * 60
}

fn default_claim_batch_size() -> u64 {
    50
}

fn default_dispatcher_workers() -> u32 {
    2
}

fn default_dispatch_poll_interval_secs() -> u64 {
    5
}

fn default_reconcile_interval_secs() -> u64 {
    3600
}

fn default_reconcile_max_items() -> u64 {
    3000
}

impl OutboxConfig {
    /// Reject knob combinations the dispatcher cannot run safely with.
    pub fn validate(&self) -> Result<(), String> {
        if self.lease_duration_secs <= self.delivery_timeout_secs {
            return Err(format!(
                "LEASE_DURATION_SECS ({}) must exceed DELIVERY_TIMEOUT_SECS ({})",
                self.lease_duration_secs, self.delivery_timeout_secs
            ));
        }
        if self.max_attempts == 0 {
            return Err("MAX_ATTEMPTS must be at least 1".to_owned());
        }
        if self.claim_batch_size == 0 {
            return Err("CLAIM_BATCH_SIZE must be at least 1".to_owned());
        }
        if self.backoff_base_secs > self.backoff_max_secs {
            return Err(format!(
                "BACKOFF_BASE_SECS ({}) must not exceed BACKOFF_MAX_SECS ({})",
                self.backoff_base_secs, self.backoff_max_secs
            ));
        }
        if self.backoff_max_secs > MAX_DELAY.as_secs() {
            return Err(format!(
                "BACKOFF_MAX_SECS ({}) must not exceed {}",
                self.backoff_max_secs,
                MAX_DELAY.as_secs()
            ));
        }
        if self.reconcile_interval_secs == 0 {
            return Err("RECONCILE_INTERVAL_SECS must be at least 1".to_owned());
        }
        if self.integrations.iter().any(|i| i.trim().is_empty()) {
            return Err("INTEGRATIONS must not contain empty ids".to_owned());
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_secs(self.backoff_base_secs),
            max: Duration::from_secs(self.backoff_max_secs),
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            retry: self.retry_policy(),
            lease_duration: secs(self.lease_duration_secs),
            delivery_timeout: self.delivery_timeout(),
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            stale_threshold: secs(self.stale_threshold_secs),
            max_items: self.reconcile_max_items,
        }
    }
}

fn secs(n: u64) -> chrono::Duration {
    let n = i64::try_from(n).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    chrono::Duration::seconds(n)
}
