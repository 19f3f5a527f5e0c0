//! Lifecycle states for outbox entries and reconcile runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Delivery state of an outbox entry.
///
/// ```text
/// queued ──claim──▶ leased ──success──▶ delivered
///   ▲                 │
///   │                 ├──retryable──▶ retry_scheduled ──claim──▶ leased
///   │                 └──permanent / attempts exhausted──▶ dead_lettered
///   └──reconcile (expired lease or stale queue)──┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Queued,
    Leased,
    Delivered,
    RetryScheduled,
    DeadLettered,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 5] = [
        Self::Queued,
        Self::Leased,
        Self::Delivered,
        Self::RetryScheduled,
        Self::DeadLettered,
    ];

    /// States from which the lease manager may claim an entry.
    pub const CLAIMABLE: [OutboxStatus; 2] = [Self::Queued, Self::RetryScheduled];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Leased => "leased",
            Self::Delivered => "delivered",
            Self::RetryScheduled => "retry_scheduled",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn is_claimable(self) -> bool {
        Self::CLAIMABLE.contains(&self)
    }

    /// `delivered` and `dead_lettered` are never left by any automated component.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::DeadLettered)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a stored string is not a known status.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for OutboxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "leased" => Ok(Self::Leased),
            "delivered" => Ok(Self::Delivered),
            "retry_scheduled" => Ok(Self::RetryScheduled),
            "dead_lettered" => Ok(Self::DeadLettered),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Outcome state of a reconcile sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    Running,
    Completed,
    Failed,
}

impl ReconcileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ReconcileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconcileStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}
